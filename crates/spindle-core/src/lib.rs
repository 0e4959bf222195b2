//! spindle-core
//!
//! 遅れて届き、リモートで変更される document への非ブロッキングなアクセス。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids と正規 url, `Value`, handle の状態とイベント, 構造的等価性, errors）
//! - **cache**: `Awaitable`, `Suspension`, 単一実行の `ResolutionCache`
//! - **ports**: 抽象化レイヤー（ResourceStore / ResourceHandle, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryStore）
//! - **app**: handle の解決, document ヘルパー, `SelectionEngine`
//! - **observability**: カウンタの参照
//!
//! # Suspension
//! 同期で終わらない lookup は `Lookup::Suspended` を返します。呼び出し側は
//! suspension を待って同じ呼び出しを繰り返します。裏の処理はキーごとに 1 回だけ始まります。

pub mod app;
pub mod cache;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
