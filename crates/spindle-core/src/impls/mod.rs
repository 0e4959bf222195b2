//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStore**: 開発用・テスト用の ResourceStore
//!
//! # 本番用実装
//! ネットワーク越し・永続化ありの store はこのクレートの外に置き、
//! `ports::ResourceStore` を通して差し込みます。

pub mod inmem_store;

pub use self::inmem_store::{InMemoryHandle, InMemoryStore};
