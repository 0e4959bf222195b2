//! Document helpers on top of the handle resolver.

use tracing::debug;

use crate::cache::Lookup;
use crate::domain::{AnyDocumentId, HandleState, ResolveError, ResourceUrl, Value};
use crate::ports::{HandleRef, ResourceStore};

use super::resolver::{HandleCache, handle, resolve_handle};

/// Current content of the document named by `id`.
///
/// Suspends while the handle is loading, like [`resolve_handle`].
pub fn document<S>(
    id: impl Into<AnyDocumentId>,
    store: &S,
    cache: &HandleCache,
) -> Result<Lookup<Value>, ResolveError>
where
    S: ResourceStore + ?Sized,
{
    match resolve_handle(id, store, cache)? {
        Lookup::Ready(handle) => read(&handle).map(Lookup::Ready),
        Lookup::Suspended(suspension) => Ok(Lookup::Suspended(suspension)),
    }
}

/// Async variant of [`document`].
pub async fn load_document<S>(
    id: impl Into<AnyDocumentId>,
    store: &S,
    cache: &HandleCache,
) -> Result<Value, ResolveError>
where
    S: ResourceStore + ?Sized,
{
    let handle = handle(id, store, cache).await?;
    read(&handle)
}

/// Apply `f` to the document named by `id`.
///
/// Suspends without calling `f` while the document is loading; the caller
/// retries once the suspension settles.
pub fn update_document<S, F>(
    id: impl Into<AnyDocumentId>,
    store: &S,
    cache: &HandleCache,
    mut f: F,
) -> Result<Lookup<()>, ResolveError>
where
    S: ResourceStore + ?Sized,
    F: FnMut(&mut Value),
{
    let handle = match resolve_handle(id, store, cache)? {
        Lookup::Ready(handle) => handle,
        Lookup::Suspended(suspension) => return Ok(Lookup::Suspended(suspension)),
    };
    handle.change(&mut f)?;
    debug!(url = %handle.url(), "document updated");
    Ok(Lookup::Ready(()))
}

/// Create a document with `initial` content and return its url.
pub fn create_document<S>(store: &S, initial: impl Into<Value>) -> ResourceUrl
where
    S: ResourceStore + ?Sized,
{
    let url = store.create(initial.into()).url();
    debug!(url = %url, "document created");
    url
}

fn read(handle: &HandleRef) -> Result<Value, ResolveError> {
    if let Some(doc) = handle.read_sync() {
        return Ok(doc);
    }
    let url = handle.url();
    match handle.state() {
        HandleState::Deleted => Err(ResolveError::DocumentDeleted { url }),
        state => Err(ResolveError::UnexpectedState { url, state }),
    }
}
