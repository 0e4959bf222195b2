//! SelectionEngine - 監視中の document から値を導出する
//!
//! id の一覧が変わるたび、また監視中の handle に change / delete が来るたびに
//! selector で selection を計算し直します。等価関数が前回公開した値と
//! 異なると判断したときだけ公開します。
//!
//! # 監視対象 id のライフサイクル
//! - 一覧に追加: store から handle を直接取得し（loading 中の handle も
//!   selector の入力として有効）、change と delete の listener を 1 つずつ登録する
//! - 一覧から削除: 両方の listener を解除して記録を捨てる。再追加は最初からやり直し

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{
    AnyDocumentId, EventPayload, HandleEvent, HandleInfo, HandleState, ResourceUrl,
    SelectionError, StructuralEq, Value, structural_eq, to_canonical,
};
use crate::observability::SelectionStats;
use crate::ports::{HandleRef, Listener, ListenerId, ResourceStore};

/// Derives the selection from the watched handles, in id-list order.
pub type Selector<S> = Arc<dyn Fn(&[HandleInfo]) -> S + Send + Sync>;

/// Decides whether two selections are the same; `true` suppresses publication.
pub type EqualFn<S> = Arc<dyn Fn(&S, &S) -> bool + Send + Sync>;

/// Output of the default selector.
pub type DocumentMap = HashMap<ResourceUrl, Option<Value>>;

/// Default selector: current content per document, `None` while it has none.
pub fn select_documents(infos: &[HandleInfo]) -> DocumentMap {
    infos
        .iter()
        .map(|info| (info.url, info.value.clone()))
        .collect()
}

struct Subscription {
    handle: HandleRef,
    on_change: ListenerId,
    on_delete: ListenerId,
}

impl Subscription {
    /// Remove both listeners. A registration the handle no longer knows is a
    /// mismatch and is reported, after the other one has been removed.
    fn detach(self) -> Result<(), SelectionError> {
        let url = self.handle.url();
        let mut result = Ok(());
        for (event, id) in [
            (HandleEvent::Change, self.on_change),
            (HandleEvent::Delete, self.on_delete),
        ] {
            if !self.handle.off(event, id) {
                error!(url = %url, event = ?event, listener = %id, "listener was not registered");
                result = Err(SelectionError::NotSubscribed { url });
            }
        }
        result
    }
}

#[derive(Default)]
struct Watched {
    ids: Vec<ResourceUrl>,
    subscriptions: HashMap<ResourceUrl, Subscription>,
}

struct EngineShared<S> {
    store: Arc<dyn ResourceStore>,
    watched: Mutex<Watched>,
    selector: RwLock<Selector<S>>,
    equal: EqualFn<S>,
    published: watch::Sender<S>,
    /// Serializes recomputations so publications follow read order.
    recompute_lock: Mutex<()>,
    recomputations: AtomicU64,
    publications: AtomicU64,
}

/// Incremental selection over a set of documents.
///
/// The selector is called with the engine's internal locks held and must not
/// call back into the engine.
pub struct SelectionEngine<S> {
    shared: Arc<EngineShared<S>>,
}

impl SelectionEngine<DocumentMap> {
    /// Default selector and structural equality.
    pub fn with_defaults(store: Arc<dyn ResourceStore>) -> Self {
        Self::with_selector(store, Arc::new(select_documents))
    }
}

impl<S> SelectionEngine<S>
where
    S: StructuralEq + Clone + Send + Sync + 'static,
{
    /// Custom selector, structural equality.
    pub fn with_selector(store: Arc<dyn ResourceStore>, selector: Selector<S>) -> Self {
        Self::new(store, selector, Arc::new(|a: &S, b: &S| structural_eq(a, b)))
    }
}

impl<S> SelectionEngine<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn ResourceStore>, selector: Selector<S>, equal: EqualFn<S>) -> Self {
        let (published, _) = watch::channel(selector(&[]));
        Self {
            shared: Arc::new(EngineShared {
                store,
                watched: Mutex::new(Watched::default()),
                selector: RwLock::new(selector),
                equal,
                published,
                recompute_lock: Mutex::new(()),
                recomputations: AtomicU64::new(0),
                publications: AtomicU64::new(0),
            }),
        }
    }

    /// Watch exactly `ids` and return the current selection.
    ///
    /// A `selector` replaces the current one for every later recomputation.
    /// Swapping it does not recompute by itself.
    ///
    /// A detach that finds no subscription is reported as
    /// `SelectionError::NotSubscribed` after the rest of the update has been
    /// applied.
    pub fn select<I>(&self, ids: I, selector: Option<Selector<S>>) -> Result<S, SelectionError>
    where
        I: IntoIterator,
        I::Item: Into<AnyDocumentId>,
    {
        let mut urls = Vec::new();
        for id in ids {
            let url = to_canonical(&id.into())?;
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        if let Some(selector) = selector {
            *self.shared.selector.write() = selector;
        }

        let mut detached = Vec::new();
        let mut loading = Vec::new();
        let mut mismatch = None;
        let changed = {
            let mut watched = self.shared.watched.lock();
            if watched.ids == urls {
                false
            } else {
                let keep: HashSet<_> = urls.iter().collect();
                let removed: Vec<_> = watched
                    .ids
                    .iter()
                    .filter(|url| !keep.contains(url))
                    .copied()
                    .collect();
                for url in removed {
                    match watched.subscriptions.remove(&url) {
                        Some(subscription) => detached.push(subscription),
                        // Every listed id has a record; a miss means the two
                        // maps went out of sync.
                        None => {
                            error!(url = %url, "was not listening for changes to document");
                            mismatch.get_or_insert(SelectionError::NotSubscribed { url });
                        }
                    }
                }

                for url in &urls {
                    if watched.subscriptions.contains_key(url) {
                        continue;
                    }
                    let subscription = self.attach(*url);
                    if subscription.handle.read_sync().is_none() {
                        loading.push((*url, Arc::clone(&subscription.handle)));
                    }
                    watched.subscriptions.insert(*url, subscription);
                }
                watched.ids = urls;
                true
            }
        }; // Lock released here

        for subscription in detached {
            debug!(url = %subscription.handle.url(), "detached");
            if let Err(err) = subscription.detach() {
                mismatch.get_or_insert(err);
            }
        }
        for (url, handle) in loading {
            self.recompute_when_ready(url, &handle);
        }
        if changed {
            self.shared.recompute();
        }

        match mismatch {
            Some(err) => Err(err),
            None => Ok(self.selection()),
        }
    }

    /// Stop watching one id and recompute.
    pub fn unsubscribe(&self, id: impl Into<AnyDocumentId>) -> Result<(), SelectionError> {
        let url = to_canonical(&id.into())?;
        let subscription = {
            let mut watched = self.shared.watched.lock();
            watched.ids.retain(|watched_url| *watched_url != url);
            watched.subscriptions.remove(&url)
        };
        let Some(subscription) = subscription else {
            error!(url = %url, "was not listening for changes to document");
            return Err(SelectionError::NotSubscribed { url });
        };
        let detached = subscription.detach();
        debug!(url = %url, "detached");
        self.shared.recompute();
        detached
    }

    /// Last published selection.
    pub fn selection(&self) -> S {
        self.shared.published.borrow().clone()
    }

    /// Receiver notified on every publication.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.shared.published.subscribe()
    }

    /// Currently watched ids, in list order.
    pub fn watched(&self) -> Vec<ResourceUrl> {
        self.shared.watched.lock().ids.clone()
    }

    pub fn stats(&self) -> SelectionStats {
        SelectionStats {
            watched: self.shared.watched.lock().subscriptions.len(),
            recomputations: self.shared.recomputations.load(Ordering::Relaxed),
            publications: self.shared.publications.load(Ordering::Relaxed),
        }
    }

    /// Detach every listener and forget the id list. The published selection
    /// is left as is.
    pub fn close(&self) {
        let subscriptions = {
            let mut watched = self.shared.watched.lock();
            watched.ids.clear();
            std::mem::take(&mut watched.subscriptions)
        };
        if !subscriptions.is_empty() {
            debug!(count = subscriptions.len(), "closing selection");
        }
        for subscription in subscriptions.into_values() {
            // Mismatches are logged by `detach`.
            let _ = subscription.detach();
        }
    }

    fn attach(&self, url: ResourceUrl) -> Subscription {
        let handle = self.shared.store.find(&url);
        let on_change = handle.on(HandleEvent::Change, self.listener());
        let on_delete = handle.on(HandleEvent::Delete, self.listener());
        debug!(url = %url, state = %handle.state(), "attached");
        Subscription {
            handle,
            on_change,
            on_delete,
        }
    }

    fn listener(&self) -> Listener {
        let engine = Arc::downgrade(&self.shared);
        Arc::new(move |payload: &EventPayload| {
            if let Some(engine) = engine.upgrade() {
                engine.on_event(payload);
            }
        })
    }

    fn recompute_when_ready(&self, url: ResourceUrl, handle: &HandleRef) {
        let engine: Weak<EngineShared<S>> = Arc::downgrade(&self.shared);
        handle
            .when_ready(&HandleState::SETTLED)
            .on_settled(move |_| {
                let Some(engine) = engine.upgrade() else {
                    return;
                };
                if engine.is_watching(&url) {
                    engine.recompute();
                } else {
                    warn!(url = %url, "ignoring readiness of a document no longer watched");
                }
            });
    }
}

impl<S> EngineShared<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn is_watching(&self, url: &ResourceUrl) -> bool {
        self.watched.lock().subscriptions.contains_key(url)
    }

    fn on_event(&self, payload: &EventPayload) {
        let url = payload.url();
        if !self.is_watching(&url) {
            debug!(url = %url, "event for a document no longer watched");
            return;
        }
        debug!(url = %url, event = ?payload.kind(), "handle event");
        self.recompute();
    }

    fn recompute(&self) {
        let _serial = self.recompute_lock.lock();
        let handles: Vec<(ResourceUrl, HandleRef)> = {
            let watched = self.watched.lock();
            watched
                .ids
                .iter()
                .filter_map(|url| {
                    watched
                        .subscriptions
                        .get(url)
                        .map(|s| (*url, Arc::clone(&s.handle)))
                })
                .collect()
        };
        let infos: Vec<HandleInfo> = handles
            .into_iter()
            .map(|(url, handle)| HandleInfo {
                url,
                state: handle.state(),
                value: handle.read_sync(),
            })
            .collect();

        let selector = Arc::clone(&*self.selector.read());
        let next = selector(&infos);
        self.recomputations.fetch_add(1, Ordering::Relaxed);

        let published = self.published.send_if_modified(|current| {
            if (self.equal)(current, &next) {
                false
            } else {
                *current = next;
                true
            }
        });
        if published {
            self.publications.fetch_add(1, Ordering::Relaxed);
            debug!(watched = infos.len(), "selection published");
        }
    }
}

impl<S> Drop for SelectionEngine<S> {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut self.shared.watched.lock().subscriptions);
        for subscription in subscriptions.into_values() {
            // Mismatches are logged by `detach`.
            let _ = subscription.detach();
        }
    }
}
