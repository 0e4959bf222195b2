//! ResolutionCache - キーごとの単一実行キャッシュ
//!
//! # 契約
//! - キーごとに `Awaitable` を 1 つ持つ。最初の `resolve` で作られ、
//!   `forget` でのみ消える。追い出しはなく、寿命は所有者が決める
//! - 存在確認と作成はマップのロック下で一度に行うので、スレッド間で
//!   共有しても executor はキーごとに高々 1 回しか走らない
//! - executor 自体はロックの外で走る。同期で確定しても、後で別スレッドから
//!   確定しても、キャッシュに再入してもよい

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::hash::Hash;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::awaitable::{AwaitStatus, Awaitable, Settler};
use super::suspension::{Settlement, Suspension};
use crate::domain::Reason;
use crate::observability::CacheCounts;

/// Outcome of a non-blocking lookup.
#[derive(Debug)]
#[must_use = "a suspended lookup has to be waited on and repeated"]
pub enum Lookup<T> {
    Ready(T),
    /// Not settled yet: wait on the suspension, then look up again.
    Suspended(Suspension),
}

impl<T> Lookup<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Lookup::Ready(value) => Some(value),
            Lookup::Suspended(_) => None,
        }
    }

    pub fn suspension(&self) -> Option<&Suspension> {
        match self {
            Lookup::Ready(_) => None,
            Lookup::Suspended(suspension) => Some(suspension),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Ready(value) => Lookup::Ready(f(value)),
            Lookup::Suspended(suspension) => Lookup::Suspended(suspension),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Absent,
    Pending,
    Fulfilled,
    Rejected,
}

impl From<AwaitStatus> for EntryStatus {
    fn from(status: AwaitStatus) -> Self {
        match status {
            AwaitStatus::Pending => EntryStatus::Pending,
            AwaitStatus::Fulfilled => EntryStatus::Fulfilled,
            AwaitStatus::Rejected => EntryStatus::Rejected,
        }
    }
}

/// A rejected entry, tagged with its key.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub key: String,
    pub reason: Reason,
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The entry for `key` settled as rejected.
    #[error("resolution of {key} was rejected: {reason}")]
    Rejected {
        key: String,
        #[source]
        reason: Reason,
    },

    /// One or more entries of a batch settled as rejected.
    #[error("{} resolution(s) were rejected: {}", .0.len(), summarize(.0))]
    Aggregate(Vec<Rejection>),
}

impl CacheError {
    /// Every rejection reason carried by this error.
    pub fn reasons(&self) -> Vec<&Reason> {
        match self {
            CacheError::Rejected { reason, .. } => vec![reason],
            CacheError::Aggregate(rejections) => rejections.iter().map(|r| &r.reason).collect(),
        }
    }
}

fn summarize(rejections: &[Rejection]) -> String {
    rejections
        .iter()
        .map(|r| format!("{}: {}", r.key, r.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Keyed store of `Awaitable`s with single-flight resolution.
pub struct ResolutionCache<K, V> {
    entries: Mutex<HashMap<K, Awaitable<V>>>,
}

impl<K, V> ResolutionCache<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `key`, starting `executor` if the key has never been seen.
    ///
    /// - unseen key: install a pending entry, run the executor, suspend
    ///   (even if the executor already settled)
    /// - pending entry: suspend on the same `Awaitable`
    /// - fulfilled entry: the cached value
    /// - rejected entry: `CacheError::Rejected`
    pub fn resolve<E>(&self, key: K, executor: E) -> Result<Lookup<V>, CacheError>
    where
        E: FnOnce(&K, Settler<V>),
    {
        let (awaitable, started) = self.entry_or_start(&key);
        if started {
            debug!(key = %key, "starting resolution");
            executor(&key, awaitable.settler());
            return Ok(Lookup::Suspended(awaitable.suspension()));
        }
        Self::settled_or_suspended(&key, &awaitable)
    }

    /// Batch variant of [`resolve`](Self::resolve).
    ///
    /// Starts every unseen key first. Then suspends while anything is
    /// outstanding (directly on the entry when only one is), fails with
    /// `CacheError::Aggregate` if any entry was rejected, and otherwise
    /// returns the values in `keys` order.
    pub fn resolve_all<E>(&self, keys: &[K], mut executor: E) -> Result<Lookup<Vec<V>>, CacheError>
    where
        E: FnMut(&K, Settler<V>),
    {
        let mut entries = Vec::with_capacity(keys.len());
        let mut outstanding: Vec<Awaitable<V>> = Vec::new();
        for key in keys {
            let (awaitable, started) = self.entry_or_start(key);
            if started {
                debug!(key = %key, "starting resolution");
                executor(key, awaitable.settler());
            }
            if (started || !awaitable.is_settled())
                && !outstanding.iter().any(|a| a.ptr_eq(&awaitable))
            {
                outstanding.push(awaitable.clone());
            }
            entries.push((key, awaitable));
        }

        match outstanding.len() {
            0 => {}
            1 => return Ok(Lookup::Suspended(outstanding[0].suspension())),
            _ => {
                return Ok(Lookup::Suspended(Suspension::All(
                    outstanding
                        .into_iter()
                        .map(|a| std::sync::Arc::new(a) as std::sync::Arc<dyn Settlement>)
                        .collect(),
                )));
            }
        }

        let mut values = Vec::with_capacity(entries.len());
        let mut rejections = Vec::new();
        for (key, awaitable) in entries {
            match awaitable.outcome() {
                Some(Ok(value)) => values.push(value),
                Some(Err(reason)) => rejections.push(Rejection {
                    key: key.to_string(),
                    reason,
                }),
                // Settled above, and entries never go back to pending.
                None => return Ok(Lookup::Suspended(awaitable.suspension())),
            }
        }
        if !rejections.is_empty() {
            return Err(CacheError::Aggregate(rejections));
        }
        Ok(Lookup::Ready(values))
    }

    /// Resolve and wait: the retry loop a host scheduler would run, packaged
    /// for async callers. The executor still runs at most once per key.
    pub async fn resolve_async<E>(&self, key: K, executor: E) -> Result<V, CacheError>
    where
        E: FnOnce(&K, Settler<V>),
    {
        let (awaitable, started) = self.entry_or_start(&key);
        if started {
            debug!(key = %key, "starting resolution");
            executor(&key, awaitable.settler());
        }
        awaitable.wait().await.map_err(|reason| CacheError::Rejected {
            key: key.to_string(),
            reason,
        })
    }

    pub fn status(&self, key: &K) -> EntryStatus {
        self.entries
            .lock()
            .get(key)
            .map_or(EntryStatus::Absent, |a| a.status().into())
    }

    /// Drop the entry for `key`; the next `resolve` runs its executor again.
    /// Returns whether an entry was present.
    pub fn forget(&self, key: &K) -> bool {
        let removed = self.entries.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "forgot resolution");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn counts_by_status(&self) -> CacheCounts {
        let entries = self.entries.lock();
        let mut counts = CacheCounts::default();
        for awaitable in entries.values() {
            match awaitable.status() {
                AwaitStatus::Pending => counts.pending += 1,
                AwaitStatus::Fulfilled => counts.fulfilled += 1,
                AwaitStatus::Rejected => counts.rejected += 1,
            }
        }
        counts
    }

    /// Existing entry, or a freshly installed pending one (`true`).
    fn entry_or_start(&self, key: &K) -> (Awaitable<V>, bool) {
        let mut entries = self.entries.lock();
        match entries.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(Awaitable::pending()).clone(), true),
        }
    }

    fn settled_or_suspended(key: &K, awaitable: &Awaitable<V>) -> Result<Lookup<V>, CacheError> {
        match awaitable.outcome() {
            None => Ok(Lookup::Suspended(awaitable.suspension())),
            Some(Ok(value)) => Ok(Lookup::Ready(value)),
            Some(Err(reason)) => Err(CacheError::Rejected {
                key: key.to_string(),
                reason,
            }),
        }
    }
}

impl<K, V> Default for ResolutionCache<K, V>
where
    K: Eq + Hash + Clone + Display,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
