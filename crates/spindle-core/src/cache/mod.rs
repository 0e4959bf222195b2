//! Cache - 単一実行の解決キャッシュ
//!
//! # 主要コンポーネント
//! - **Awaitable**: 一度だけ確定する値の入れ物（await / 継続登録の両方に対応）
//! - **Suspension**: 「まだ準備できていない、確定したら呼び直す」という合図
//! - **ResolutionCache**: キーごとに executor を高々 1 回だけ実行するキャッシュ

mod awaitable;
mod resolution;
mod suspension;

pub use awaitable::{AwaitStatus, Awaitable, Settler};
pub use resolution::{CacheError, EntryStatus, Lookup, Rejection, ResolutionCache};
pub use suspension::{Settlement, Suspension};
