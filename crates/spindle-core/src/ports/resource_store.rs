//! ResourceStore port - ドキュメントの正本（外部のリポジトリ）
//!
//! 同期・永続化・マージは store 側の責務です。
//! このクレートが使うのは find/create/delete と、handle ごとの
//! 状態参照・ready 待ち・変更通知だけです。
//!
//! # 契約
//! - `find` は冪等: 同じ url には store の生存中ずっと同じ handle を返す
//! - Listener は store のロックを持たずに、handle ごとの発行順で呼ばれる

use std::fmt;
use std::sync::Arc;

use crate::cache::Awaitable;
use crate::domain::{EventPayload, HandleEvent, HandleState, ResourceUrl, StoreError, Value};

/// Shared reference to a handle. The store keeps its own reference too.
pub type HandleRef = Arc<dyn ResourceHandle>;

/// Callback registered on a handle.
pub type Listener = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Token returned by `on`, passed back to `off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Live reference to one document.
pub trait ResourceHandle: Send + Sync {
    fn url(&self) -> ResourceUrl;

    fn state(&self) -> HandleState;

    fn in_state(&self, states: &[HandleState]) -> bool {
        states.contains(&self.state())
    }

    fn is_ready(&self) -> bool {
        self.state() == HandleState::Ready
    }

    /// Best-effort synchronous read. `None` until the document has data, and
    /// again after deletion.
    fn read_sync(&self) -> Option<Value>;

    /// Fulfilled with the reached state once the handle is in one of
    /// `accepted` (immediately if it already is).
    fn when_ready(&self, accepted: &[HandleState]) -> Awaitable<HandleState>;

    fn on(&self, event: HandleEvent, listener: Listener) -> ListenerId;

    /// Returns whether a registration was removed.
    fn off(&self, event: HandleEvent, id: ListenerId) -> bool;

    /// Apply a local mutation and notify change listeners.
    fn change(&self, f: &mut dyn FnMut(&mut Value)) -> Result<(), StoreError>;
}

impl fmt::Debug for dyn ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("url", &format_args!("{}", self.url()))
            .field("state", &self.state())
            .finish()
    }
}

pub trait ResourceStore: Send + Sync {
    fn find(&self, url: &ResourceUrl) -> HandleRef;

    /// The store assigns the new document's id.
    fn create(&self, initial: Value) -> HandleRef;

    fn delete(&self, url: &ResourceUrl);
}
