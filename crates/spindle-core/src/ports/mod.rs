//! Ports - 抽象化レイヤー
//!
//! このクレートの外側にあるもの（ドキュメントの正本、時計、ID 生成）との境界です。
//! 開発・テスト用の実装は `impls` にあります。
//!
//! # 主要な port
//! - **ResourceStore / ResourceHandle**: ドキュメントの検索・作成・削除と変更通知
//! - **Clock**: 現在時刻
//! - **IdGenerator**: ドキュメント ID の発行

pub mod clock;
pub mod id_generator;
pub mod resource_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::resource_store::{HandleRef, Listener, ListenerId, ResourceHandle, ResourceStore};
