//! Awaitable - 一度だけ確定する値
//!
//! # 契約
//! - 状態遷移は Pending -> Fulfilled か Pending -> Rejected の一度きり。
//!   2 回目以降の確定は何もせず `false` を返す
//! - async の待ち手は `Notify` で待機し、`on_settled` で登録した継続は
//!   確定させたスレッド上でロックの外から呼ばれる
//! - 誰も観測しない reject は状態として残るだけで、panic しない

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::suspension::{Settlement, Suspension};
use crate::domain::Reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitStatus {
    Pending,
    Fulfilled,
    Rejected,
}

type Continuation<V> = Box<dyn FnOnce(Result<V, Reason>) + Send>;

enum Slot<V> {
    Pending(Vec<Continuation<V>>),
    Fulfilled(V),
    Rejected(Reason),
}

struct Shared<V> {
    slot: Mutex<Slot<V>>,
    notify: Notify,
}

/// Shared handle to a settle-once value. Clones observe the same slot.
pub struct Awaitable<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Awaitable<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Clone + Send + 'static> Awaitable<V> {
    pub fn pending() -> Self {
        Self::with_slot(Slot::Pending(Vec::new()))
    }

    pub fn fulfilled(value: V) -> Self {
        Self::with_slot(Slot::Fulfilled(value))
    }

    pub fn rejected(reason: impl Into<Reason>) -> Self {
        Self::with_slot(Slot::Rejected(reason.into()))
    }

    fn with_slot(slot: Slot<V>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(slot),
                notify: Notify::new(),
            }),
        }
    }

    /// The externally-invokable `complete`/`fail` pair for this slot.
    pub fn settler(&self) -> Settler<V> {
        Settler {
            target: self.clone(),
        }
    }

    /// Fulfil the slot. Returns `false` if it was already settled.
    pub fn complete(&self, value: V) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the slot. Returns `false` if it was already settled.
    pub fn fail(&self, reason: impl Into<Reason>) -> bool {
        self.settle(Err(reason.into()))
    }

    fn settle(&self, outcome: Result<V, Reason>) -> bool {
        let continuations = {
            let mut slot = self.shared.slot.lock();
            let Slot::Pending(waiting) = &mut *slot else {
                return false;
            };
            let waiting = std::mem::take(waiting);
            *slot = match &outcome {
                Ok(value) => Slot::Fulfilled(value.clone()),
                Err(reason) => Slot::Rejected(reason.clone()),
            };
            waiting
        }; // Lock released here

        // Wake and run continuations outside the lock so they may touch the
        // slot again.
        self.shared.notify.notify_waiters();
        for continuation in continuations {
            continuation(outcome.clone());
        }
        true
    }

    pub fn status(&self) -> AwaitStatus {
        match &*self.shared.slot.lock() {
            Slot::Pending(_) => AwaitStatus::Pending,
            Slot::Fulfilled(_) => AwaitStatus::Fulfilled,
            Slot::Rejected(_) => AwaitStatus::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status() != AwaitStatus::Pending
    }

    /// `None` while pending.
    pub fn outcome(&self) -> Option<Result<V, Reason>> {
        match &*self.shared.slot.lock() {
            Slot::Pending(_) => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    pub fn value(&self) -> Option<V> {
        self.outcome().and_then(Result::ok)
    }

    pub fn reason(&self) -> Option<Reason> {
        self.outcome().and_then(Result::err)
    }

    /// Run `f` once the slot settles, or right away if it already has.
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(Result<V, Reason>) + Send + 'static,
    {
        let outcome = {
            let mut slot = self.shared.slot.lock();
            match &mut *slot {
                Slot::Pending(waiting) => {
                    waiting.push(Box::new(f));
                    return;
                }
                Slot::Fulfilled(value) => Ok(value.clone()),
                Slot::Rejected(reason) => Err(reason.clone()),
            }
        };
        f(outcome);
    }

    /// Wait for settlement and return the value or the rejection reason.
    pub async fn wait(&self) -> Result<V, Reason> {
        loop {
            // Register interest before checking, so a settlement between the
            // check and the await is not missed.
            let mut notified = pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Type-erased suspension on this slot alone.
    pub fn suspension(&self) -> Suspension
    where
        V: Sync,
    {
        Suspension::One(Arc::new(self.clone()))
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> Settlement for Awaitable<V> {
    fn is_settled(&self) -> bool {
        Awaitable::is_settled(self)
    }

    async fn settled(&self) {
        let _ = self.wait().await;
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.shared) as *const () as usize
    }
}

impl<V> fmt::Debug for Awaitable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &*self.shared.slot.lock() {
            Slot::Pending(waiting) => format!("pending ({} continuations)", waiting.len()),
            Slot::Fulfilled(_) => "fulfilled".to_string(),
            Slot::Rejected(reason) => format!("rejected: {reason}"),
        };
        f.debug_struct("Awaitable").field("status", &status).finish()
    }
}

/// The settling side of an `Awaitable`, handed to executors.
///
/// Cloneable, so a synchronous and an asynchronous branch of the same
/// executor can both hold it. Only the first settlement counts.
pub struct Settler<V> {
    target: Awaitable<V>,
}

impl<V> Clone for Settler<V> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> Settler<V> {
    pub fn complete(&self, value: V) -> bool {
        self.target.complete(value)
    }

    pub fn fail(&self, reason: impl Into<Reason>) -> bool {
        self.target.fail(reason)
    }

    pub fn is_settled(&self) -> bool {
        self.target.is_settled()
    }
}

impl<V> fmt::Debug for Settler<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").field("target", &self.target).finish()
    }
}
