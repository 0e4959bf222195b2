//! App - アプリケーション層
//!
//! このモジュールは、cache と ports を組み合わせて利用者向けの操作を実装します。
//!
//! # 主要コンポーネント
//! - **resolver**: 任意の document id から ready な handle へ（url ごとに単一実行）
//! - **document**: resolver の上に載せた read / update / create
//! - **selection**: 変化する document 集合に対する差分 selection

pub mod document;
pub mod resolver;
pub mod selection;

pub use self::document::{create_document, document, load_document, update_document};
pub use self::resolver::{HandleCache, handle, resolve_handle, resolve_handles};
pub use self::selection::{DocumentMap, EqualFn, SelectionEngine, Selector, select_documents};
