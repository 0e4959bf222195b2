//! Handle resolver - document id から ready な handle へ
//!
//! 受け付けた id はすべて正規 url に変換し、その url をキーにした
//! `ResolutionCache` を通します。store での検索はキャッシュごとに
//! document 1 つにつき高々 1 回です。

use std::sync::Arc;

use tracing::debug;

use crate::cache::{Lookup, ResolutionCache, Settler};
use crate::domain::{AnyDocumentId, HandleState, ResolveError, ResourceUrl, to_canonical};
use crate::ports::{HandleRef, ResourceStore};

/// Cache of resolved handles, scoped by its owner.
pub type HandleCache = ResolutionCache<ResourceUrl, HandleRef>;

/// Resolve `id` to a ready handle.
///
/// Returns `Lookup::Suspended` while the document is loading; wait on the
/// suspension and call again. Deleted and unavailable documents fail with
/// the matching `ResolveError`, and keep failing until the url is
/// `forget`-ten from the cache.
pub fn resolve_handle<S>(
    id: impl Into<AnyDocumentId>,
    store: &S,
    cache: &HandleCache,
) -> Result<Lookup<HandleRef>, ResolveError>
where
    S: ResourceStore + ?Sized,
{
    let url = to_canonical(&id.into())?;
    let lookup = cache.resolve(url, |url, settler| start(store, url, settler))?;
    Ok(lookup)
}

/// Batch variant of [`resolve_handle`]. Handles come back in `ids` order.
pub fn resolve_handles<S, I>(
    ids: I,
    store: &S,
    cache: &HandleCache,
) -> Result<Lookup<Vec<HandleRef>>, ResolveError>
where
    S: ResourceStore + ?Sized,
    I: IntoIterator,
    I::Item: Into<AnyDocumentId>,
{
    let urls = ids
        .into_iter()
        .map(|id| to_canonical(&id.into()))
        .collect::<Result<Vec<_>, _>>()?;
    let lookup = cache.resolve_all(&urls, |url, settler| start(store, url, settler))?;
    Ok(lookup)
}

/// Resolve `id`, waiting for the document to finish loading.
pub async fn handle<S>(
    id: impl Into<AnyDocumentId>,
    store: &S,
    cache: &HandleCache,
) -> Result<HandleRef, ResolveError>
where
    S: ResourceStore + ?Sized,
{
    let url = to_canonical(&id.into())?;
    let handle = cache
        .resolve_async(url, |url, settler| start(store, url, settler))
        .await?;
    Ok(handle)
}

/// Executor body: find the handle and settle by its state, now or once it
/// leaves `Loading`.
fn start<S>(store: &S, url: &ResourceUrl, settler: Settler<HandleRef>)
where
    S: ResourceStore + ?Sized,
{
    let handle = store.find(url);
    let state = handle.state();
    if state != HandleState::Loading {
        settle(*url, handle, state, &settler);
        return;
    }

    debug!(url = %url, "waiting for document");
    let url = *url;
    let waiting = Arc::clone(&handle);
    handle
        .when_ready(&HandleState::SETTLED)
        .on_settled(move |outcome| match outcome {
            Ok(state) => settle(url, waiting, state, &settler),
            Err(reason) => {
                settler.fail(reason);
            }
        });
}

fn settle(url: ResourceUrl, handle: HandleRef, state: HandleState, settler: &Settler<HandleRef>) {
    match state {
        HandleState::Ready => settler.complete(handle),
        HandleState::Deleted => settler.fail(ResolveError::DocumentDeleted { url }),
        HandleState::Unavailable => settler.fail(ResolveError::DocumentUnavailable { url }),
        HandleState::Loading => settler.fail(ResolveError::UnexpectedState { url, state }),
    };
    debug!(url = %url, state = %state, "handle resolved");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntryStatus;
    use crate::domain::{IdError, Value};
    use crate::impls::InMemoryStore;
    use crate::ports::{IdGenerator, SystemClock, UlidGenerator};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts `find` calls on the wrapped store.
    struct CountingStore {
        inner: InMemoryStore,
        finds: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                finds: AtomicUsize::new(0),
            }
        }

        fn finds(&self) -> usize {
            self.finds.load(Ordering::SeqCst)
        }
    }

    impl ResourceStore for CountingStore {
        fn find(&self, url: &ResourceUrl) -> HandleRef {
            self.finds.fetch_add(1, Ordering::SeqCst);
            self.inner.find(url)
        }

        fn create(&self, initial: Value) -> HandleRef {
            self.inner.create(initial)
        }

        fn delete(&self, url: &ResourceUrl) {
            self.inner.delete(url)
        }
    }

    fn remote_url() -> ResourceUrl {
        ResourceUrl::from(UlidGenerator::new(SystemClock).generate_document_id())
    }

    #[test]
    fn ready_document_resolves_after_one_suspension() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = store.create(Value::record([("num", 42)])).url();

        let first = resolve_handle(url, &store, &cache).unwrap();
        let suspension = first.suspension().unwrap();
        assert!(suspension.is_settled());

        let handle = resolve_handle(url, &store, &cache).unwrap().ready().unwrap();
        assert_eq!(handle.url(), url);
        assert_eq!(store.finds(), 1);
    }

    #[test]
    fn loading_document_settles_when_provided() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = remote_url();

        let first = resolve_handle(url, &store, &cache).unwrap();
        assert!(!first.suspension().unwrap().is_settled());
        let again = resolve_handle(url, &store, &cache).unwrap();
        assert!(again.suspension().unwrap().same_as(first.suspension().unwrap()));

        store.inner.provide(&url, Value::from("hello")).unwrap();
        assert!(first.suspension().unwrap().is_settled());

        let handle = resolve_handle(url, &store, &cache).unwrap().ready().unwrap();
        assert_eq!(handle.read_sync(), Some(Value::from("hello")));
        assert_eq!(store.finds(), 1);
    }

    #[test]
    fn deleted_document_fails_with_its_url() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = store.create(Value::Null).url();
        store.delete(&url);

        assert!(!resolve_handle(url, &store, &cache).unwrap().is_ready());
        let err = resolve_handle(url, &store, &cache).unwrap_err();
        assert!(matches!(err, ResolveError::DocumentDeleted { url: u } if u == url));
        assert_eq!(cache.status(&url), EntryStatus::Rejected);
    }

    #[test]
    fn unavailable_document_fails_after_loading() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = remote_url();

        let _ = resolve_handle(url, &store, &cache).unwrap();
        store.inner.mark_unavailable(&url).unwrap();

        let err = resolve_handle(url, &store, &cache).unwrap_err();
        assert!(matches!(err, ResolveError::DocumentUnavailable { url: u } if u == url));
        assert_eq!(err.url(), Some(url));
    }

    #[test]
    fn every_id_form_shares_one_entry() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = store.create(Value::Null).url();

        let _ = resolve_handle(url, &store, &cache).unwrap();
        let _ = resolve_handle(url.document_id(), &store, &cache).unwrap();
        let _ = resolve_handle(url.to_string(), &store, &cache).unwrap();
        let _ = resolve_handle(url.document_id().as_ulid().to_string(), &store, &cache).unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(store.finds(), 1);
    }

    #[test]
    fn malformed_id_is_rejected_before_the_store() {
        let store = CountingStore::new();
        let cache = HandleCache::new();

        let err = resolve_handle("spindle:not-a-ulid", &store, &cache).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidId(IdError::Invalid { .. })));
        assert_eq!(store.finds(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn forget_allows_a_fresh_lookup() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = remote_url();

        let _ = resolve_handle(url, &store, &cache).unwrap();
        store.inner.mark_unavailable(&url).unwrap();
        assert!(resolve_handle(url, &store, &cache).is_err());

        assert!(cache.forget(&url));
        let _ = resolve_handle(url, &store, &cache).unwrap();
        assert_eq!(store.finds(), 2);
    }

    #[test]
    fn batch_waits_for_every_document() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let local = store.create(Value::from(1)).url();
        let remote = remote_url();

        let first = resolve_handles([local, remote], &store, &cache).unwrap();
        assert_eq!(first.suspension().unwrap().len(), 2);

        store.inner.provide(&remote, Value::from(2)).unwrap();
        let handles = resolve_handles([local, remote], &store, &cache)
            .unwrap()
            .ready()
            .unwrap();
        let urls: Vec<_> = handles.iter().map(|h| h.url()).collect();
        assert_eq!(urls, vec![local, remote]);
    }

    #[test]
    fn batch_reports_every_failure() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let gone = store.create(Value::Null).url();
        store.delete(&gone);
        let missing = remote_url();

        let _ = resolve_handles([gone, missing], &store, &cache).unwrap();
        store.inner.mark_unavailable(&missing).unwrap();

        let err = resolve_handles([gone, missing], &store, &cache).unwrap_err();
        let ResolveError::Cache(cache_err) = err else {
            panic!("expected an aggregate cache error, got {err:?}");
        };
        let reasons: Vec<_> = cache_err
            .reasons()
            .into_iter()
            .filter_map(|r| r.downcast_ref::<ResolveError>().cloned())
            .collect();
        assert!(matches!(reasons[0], ResolveError::DocumentDeleted { .. }));
        assert!(matches!(reasons[1], ResolveError::DocumentUnavailable { .. }));
    }

    #[tokio::test]
    async fn handle_waits_for_late_arrival() {
        let store = Arc::new(CountingStore::new());
        let cache = HandleCache::new();
        let url = remote_url();

        let provider = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            provider.inner.provide(&url, Value::from(7)).unwrap();
        });

        let handle = tokio::time::timeout(Duration::from_secs(1), handle(url, &*store, &cache))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.read_sync(), Some(Value::from(7)));
    }

    #[tokio::test]
    async fn handle_surfaces_typed_failures() {
        let store = CountingStore::new();
        let cache = HandleCache::new();
        let url = store.create(Value::Null).url();
        store.delete(&url);

        let err = handle(url, &store, &cache).await.unwrap_err();
        assert!(matches!(err, ResolveError::DocumentDeleted { .. }));
    }
}
