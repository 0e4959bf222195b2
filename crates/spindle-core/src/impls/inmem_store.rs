//! InMemoryStore - 開発用・テスト用の ResourceStore
//!
//! ローカルで作った document はすぐ ready になります。url で検索した未知の
//! document は、peer が `provide` するか unavailable にされるまで loading です。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::Awaitable;
use crate::domain::{EventPayload, HandleEvent, HandleState, ResourceUrl, StoreError, Value};
use crate::ports::{
    HandleRef, IdGenerator, Listener, ListenerId, ResourceHandle, ResourceStore, SystemClock,
    UlidGenerator,
};

/// A registered listener.
struct Registration {
    id: ListenerId,
    event: HandleEvent,
    listener: Listener,
}

/// A pending `when_ready` request.
struct ReadyWaiter {
    accepted: Vec<HandleState>,
    awaitable: Awaitable<HandleState>,
}

struct HandleInner {
    state: HandleState,
    doc: Option<Value>,
    listeners: Vec<Registration>,
    waiters: Vec<ReadyWaiter>,
    next_listener_id: u64,
    /// Total `on` calls over the handle's lifetime.
    registrations: u64,
}

/// Handle implementation for `InMemoryStore`.
pub struct InMemoryHandle {
    url: ResourceUrl,
    inner: Mutex<HandleInner>,
}

/// What a state change has to deliver once the lock is released.
struct Delivery {
    woken: Vec<(Awaitable<HandleState>, HandleState)>,
    listeners: Vec<Listener>,
    payload: Option<EventPayload>,
}

impl Delivery {
    fn run(self) {
        for (awaitable, state) in self.woken {
            awaitable.complete(state);
        }
        if let Some(payload) = self.payload {
            for listener in self.listeners {
                listener(&payload);
            }
        }
    }
}

impl InMemoryHandle {
    fn new(url: ResourceUrl, state: HandleState, doc: Option<Value>) -> Self {
        Self {
            url,
            inner: Mutex::new(HandleInner {
                state,
                doc,
                listeners: Vec::new(),
                waiters: Vec::new(),
                next_listener_id: 1,
                registrations: 0,
            }),
        }
    }

    /// The document arrived from elsewhere (Loading -> Ready), or a remote
    /// change replaced the content of a ready document.
    pub fn provide(&self, value: Value) -> Result<(), StoreError> {
        let delivery = {
            let mut inner = self.inner.lock();
            match inner.state {
                HandleState::Loading => {
                    inner.state = HandleState::Ready;
                    inner.doc = Some(value.clone());
                    let payload = EventPayload::Change {
                        url: self.url,
                        doc: value,
                    };
                    self.prepare(&mut inner, Some(payload))
                }
                HandleState::Ready => {
                    inner.doc = Some(value.clone());
                    let payload = EventPayload::Change {
                        url: self.url,
                        doc: value,
                    };
                    self.prepare(&mut inner, Some(payload))
                }
                state => {
                    return Err(StoreError::IllegalTransition {
                        url: self.url,
                        from: state,
                        to: HandleState::Ready,
                    });
                }
            }
        }; // Lock released here

        debug!(url = %self.url, "document provided");
        delivery.run();
        Ok(())
    }

    /// No source could produce the document (Loading -> Unavailable).
    pub fn mark_unavailable(&self) -> Result<(), StoreError> {
        let delivery = {
            let mut inner = self.inner.lock();
            self.transition(&mut inner, HandleState::Unavailable)?;
            self.prepare(&mut inner, None)
        };
        debug!(url = %self.url, "document unavailable");
        delivery.run();
        Ok(())
    }

    /// Remove the document (Ready -> Deleted) and notify delete listeners.
    pub fn delete(&self) -> Result<(), StoreError> {
        let delivery = {
            let mut inner = self.inner.lock();
            self.transition(&mut inner, HandleState::Deleted)?;
            inner.doc = None;
            self.prepare(&mut inner, Some(EventPayload::Delete { url: self.url }))
        };
        debug!(url = %self.url, "document deleted");
        delivery.run();
        Ok(())
    }

    /// Live listener registrations, all events.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// How many times `on` was ever called on this handle.
    pub fn registrations(&self) -> u64 {
        self.inner.lock().registrations
    }

    fn transition(&self, inner: &mut HandleInner, next: HandleState) -> Result<(), StoreError> {
        if !inner.state.can_transition_to(next) {
            return Err(StoreError::IllegalTransition {
                url: self.url,
                from: inner.state,
                to: next,
            });
        }
        inner.state = next;
        Ok(())
    }

    /// Collect the waiters the current state satisfies and the listeners
    /// interested in `payload`.
    fn prepare(&self, inner: &mut HandleInner, payload: Option<EventPayload>) -> Delivery {
        let state = inner.state;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.waiters)
            .into_iter()
            .partition(|w| w.accepted.contains(&state));
        inner.waiters = waiting;

        let listeners = match &payload {
            Some(payload) => inner
                .listeners
                .iter()
                .filter(|r| r.event == payload.kind())
                .map(|r| Arc::clone(&r.listener))
                .collect(),
            None => Vec::new(),
        };

        Delivery {
            woken: ready.into_iter().map(|w| (w.awaitable, state)).collect(),
            listeners,
            payload,
        }
    }
}

impl ResourceHandle for InMemoryHandle {
    fn url(&self) -> ResourceUrl {
        self.url
    }

    fn state(&self) -> HandleState {
        self.inner.lock().state
    }

    fn read_sync(&self) -> Option<Value> {
        self.inner.lock().doc.clone()
    }

    fn when_ready(&self, accepted: &[HandleState]) -> Awaitable<HandleState> {
        let mut inner = self.inner.lock();
        if accepted.contains(&inner.state) {
            return Awaitable::fulfilled(inner.state);
        }
        let awaitable = Awaitable::pending();
        inner.waiters.push(ReadyWaiter {
            accepted: accepted.to_vec(),
            awaitable: awaitable.clone(),
        });
        awaitable
    }

    fn on(&self, event: HandleEvent, listener: Listener) -> ListenerId {
        let mut inner = self.inner.lock();
        let id = ListenerId::new(inner.next_listener_id);
        inner.next_listener_id += 1;
        inner.registrations += 1;
        inner.listeners.push(Registration {
            id,
            event,
            listener,
        });
        id
    }

    fn off(&self, event: HandleEvent, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner
            .listeners
            .retain(|r| !(r.id == id && r.event == event));
        inner.listeners.len() != before
    }

    fn change(&self, f: &mut dyn FnMut(&mut Value)) -> Result<(), StoreError> {
        let delivery = {
            let mut inner = self.inner.lock();
            if inner.state != HandleState::Ready {
                return Err(StoreError::NotWritable {
                    url: self.url,
                    state: inner.state,
                });
            }
            let doc = inner.doc.get_or_insert_with(Value::default);
            f(doc);
            let doc = doc.clone();
            self.prepare(&mut inner, Some(EventPayload::Change { url: self.url, doc }))
        };
        delivery.run();
        Ok(())
    }
}

/// In-memory document repository.
pub struct InMemoryStore {
    handles: Mutex<HashMap<ResourceUrl, Arc<InMemoryHandle>>>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_id_generator(UlidGenerator::new(SystemClock))
    }

    pub fn with_id_generator(ids: impl IdGenerator + 'static) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            ids: Box::new(ids),
        }
    }

    /// Concrete handle for `url`, created in the loading state if unknown.
    pub fn handle(&self, url: &ResourceUrl) -> Arc<InMemoryHandle> {
        let mut handles = self.handles.lock();
        Arc::clone(handles.entry(*url).or_insert_with(|| {
            debug!(url = %url, "tracking remote document");
            Arc::new(InMemoryHandle::new(*url, HandleState::Loading, None))
        }))
    }

    /// Simulate a peer delivering the document.
    pub fn provide(&self, url: &ResourceUrl, value: Value) -> Result<(), StoreError> {
        self.handle(url).provide(value)
    }

    /// Simulate every source giving up on a document this store is tracking.
    pub fn mark_unavailable(&self, url: &ResourceUrl) -> Result<(), StoreError> {
        match self.existing(url) {
            Some(handle) => handle.mark_unavailable(),
            None => Err(StoreError::UnknownDocument { url: *url }),
        }
    }

    fn existing(&self, url: &ResourceUrl) -> Option<Arc<InMemoryHandle>> {
        self.handles.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceStore for InMemoryStore {
    fn find(&self, url: &ResourceUrl) -> HandleRef {
        self.handle(url)
    }

    fn create(&self, initial: Value) -> HandleRef {
        let url = ResourceUrl::from(self.ids.generate_document_id());
        let handle = Arc::new(InMemoryHandle::new(url, HandleState::Ready, Some(initial)));
        self.handles.lock().insert(url, Arc::clone(&handle));
        debug!(url = %url, "created document");
        handle
    }

    fn delete(&self, url: &ResourceUrl) {
        let Some(handle) = self.existing(url) else {
            warn!(url = %url, "delete of an unknown document ignored");
            return;
        };
        if let Err(err) = handle.delete() {
            warn!(url = %url, error = %err, "delete ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Listener) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let listener: Listener = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn created_documents_are_ready() {
        let store = InMemoryStore::new();
        let handle = store.create(Value::record([("num", 42)]));
        assert_eq!(handle.state(), HandleState::Ready);
        assert_eq!(handle.read_sync(), Some(Value::record([("num", 42)])));
    }

    #[test]
    fn find_is_idempotent() {
        let store = InMemoryStore::new();
        let created = store.create(Value::Null);
        let found = store.find(&created.url());
        assert!(Arc::ptr_eq(&created, &found));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_documents_load_until_provided() {
        let store = InMemoryStore::new();
        let remote = ResourceUrl::from(UlidGenerator::new(SystemClock).generate_document_id());
        let handle = store.find(&remote);
        assert_eq!(handle.state(), HandleState::Loading);
        assert!(handle.read_sync().is_none());

        let ready = handle.when_ready(&[HandleState::Ready]);
        assert!(!ready.is_settled());
        store.provide(&remote, Value::from("hi")).unwrap();
        assert_eq!(ready.value(), Some(HandleState::Ready));
        assert_eq!(handle.read_sync(), Some(Value::from("hi")));
    }

    #[test]
    fn when_ready_settles_on_any_accepted_state() {
        let store = InMemoryStore::new();
        let remote = ResourceUrl::from(UlidGenerator::new(SystemClock).generate_document_id());
        let handle = store.find(&remote);
        let only_ready = handle.when_ready(&[HandleState::Ready]);
        let settled = handle.when_ready(&HandleState::SETTLED);

        store.mark_unavailable(&remote).unwrap();
        assert_eq!(settled.value(), Some(HandleState::Unavailable));
        assert!(!only_ready.is_settled());
    }

    #[test]
    fn change_notifies_change_listeners_only() {
        let store = InMemoryStore::new();
        let handle = store.create(Value::record([("num", 1)]));
        let (changes, on_change) = counter();
        let (deletes, on_delete) = counter();
        handle.on(HandleEvent::Change, on_change);
        handle.on(HandleEvent::Delete, on_delete);

        handle
            .change(&mut |doc| *doc.field_mut("num").unwrap() = Value::from(2))
            .unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 0);
        assert_eq!(handle.read_sync(), Some(Value::record([("num", 2)])));
    }

    #[test]
    fn delete_clears_the_document_and_notifies() {
        let store = InMemoryStore::new();
        let handle = store.create(Value::record([("num", 1)]));
        let (deletes, on_delete) = counter();
        handle.on(HandleEvent::Delete, on_delete);

        store.delete(&handle.url());
        assert_eq!(handle.state(), HandleState::Deleted);
        assert!(handle.read_sync().is_none());
        assert_eq!(deletes.load(Ordering::SeqCst), 1);

        let err = handle.change(&mut |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::NotWritable { state: HandleState::Deleted, .. }));
    }

    #[test]
    fn off_removes_only_the_named_registration() {
        let store = InMemoryStore::new();
        let url = store.create(Value::Null).url();
        let handle = store.handle(&url);
        let (changes, listener) = counter();
        let first = handle.on(HandleEvent::Change, listener.clone());
        handle.on(HandleEvent::Change, listener);

        assert!(!handle.off(HandleEvent::Delete, first));
        assert!(handle.off(HandleEvent::Change, first));
        assert!(!handle.off(HandleEvent::Change, first));
        assert_eq!(handle.listener_count(), 1);
        assert_eq!(handle.registrations(), 2);

        handle.change(&mut |_| {}).unwrap();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_may_call_back_into_the_handle() {
        let store = InMemoryStore::new();
        let handle = store.create(Value::from(1));
        let reader = Arc::clone(&handle);
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        handle.on(
            HandleEvent::Change,
            Arc::new(move |_| {
                *sink.lock() = reader.read_sync();
            }),
        );
        handle.change(&mut |doc| *doc = Value::from(2)).unwrap();
        assert_eq!(*seen.lock(), Some(Value::from(2)));
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let store = InMemoryStore::new();
        let url = store.create(Value::Null).url();
        let err = store.mark_unavailable(&url).unwrap_err();
        assert!(matches!(
            err,
            StoreError::IllegalTransition {
                from: HandleState::Ready,
                to: HandleState::Unavailable,
                ..
            }
        ));
    }

    #[test]
    fn unknown_urls_are_not_tracked_by_delete_or_mark_unavailable() {
        let store = InMemoryStore::new();
        let remote = ResourceUrl::from(UlidGenerator::new(SystemClock).generate_document_id());

        store.delete(&remote);
        assert!(store.is_empty());

        let err = store.mark_unavailable(&remote).unwrap_err();
        assert!(matches!(err, StoreError::UnknownDocument { url } if url == remote));
        assert!(store.is_empty());

        store.find(&remote);
        store.mark_unavailable(&remote).unwrap();
        assert_eq!(store.len(), 1);
    }
}
