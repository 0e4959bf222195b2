//! Error taxonomy.
//!
//! - `IdError`: an identifier could not be canonicalized.
//! - `ResolveError`: terminal outcome of resolving a document handle.
//! - `SelectionError`: subscription bookkeeping went out of sync.
//! - `StoreError`: a resource store refused an operation.
//! - `Reason`: type-erased rejection reason stored inside an `Awaitable`.
//!
//! Cache-level errors live next to the cache (`cache::CacheError`).

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::ids::ResourceUrl;
use super::state::HandleState;
use crate::cache::CacheError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("document id is empty")]
    Empty,

    #[error("invalid document id {input:?}: {reason}")]
    Invalid { input: String, reason: String },
}

/// Why a handle could not be resolved. Every variant carries the canonical url.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No source could produce the document.
    #[error("document {url} is unavailable")]
    DocumentUnavailable { url: ResourceUrl },

    /// The document existed but was removed.
    #[error("document {url} was deleted")]
    DocumentDeleted { url: ResourceUrl },

    /// The handle settled in a state that cannot serve the request.
    #[error("unexpected handle state for {url}: {state}")]
    UnexpectedState { url: ResourceUrl, state: HandleState },

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(CacheError),
}

impl ResolveError {
    /// The document this error is about, when known.
    pub fn url(&self) -> Option<ResourceUrl> {
        match self {
            ResolveError::DocumentUnavailable { url }
            | ResolveError::DocumentDeleted { url }
            | ResolveError::UnexpectedState { url, .. } => Some(*url),
            ResolveError::Store(StoreError::NotWritable { url, .. })
            | ResolveError::Store(StoreError::IllegalTransition { url, .. })
            | ResolveError::Store(StoreError::UnknownDocument { url }) => Some(*url),
            ResolveError::InvalidId(_) | ResolveError::Cache(_) => None,
        }
    }
}

impl From<CacheError> for ResolveError {
    /// Rejections produced by the handle resolver are stored type-erased in
    /// the cache; surface them as the typed error they started as.
    fn from(err: CacheError) -> Self {
        if let CacheError::Rejected { reason, .. } = &err
            && let Some(typed) = reason.downcast_ref::<ResolveError>()
        {
            return typed.clone();
        }
        ResolveError::Cache(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// Detach was requested for an identifier that has no recorded listeners.
    #[error("was not listening for changes to document {url}")]
    NotSubscribed { url: ResourceUrl },

    #[error(transparent)]
    InvalidId(#[from] IdError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document {url} is {state} and cannot be changed")]
    NotWritable { url: ResourceUrl, state: HandleState },

    #[error("document {url} cannot move from {from} to {to}")]
    IllegalTransition {
        url: ResourceUrl,
        from: HandleState,
        to: HandleState,
    },

    #[error("document {url} is not known to this store")]
    UnknownDocument { url: ResourceUrl },
}

/// Rejection reason held by an `Awaitable`.
///
/// Cheap to clone, so every awaiter sees the same reason. The original error
/// can be recovered with [`Reason::downcast_ref`].
#[derive(Clone)]
pub struct Reason(Arc<dyn StdError + Send + Sync + 'static>);

impl Reason {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// A reason that is only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Reason {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<ResolveError> for Reason {
    fn from(err: ResolveError) -> Self {
        Reason::new(err)
    }
}

impl From<&str> for Reason {
    fn from(message: &str) -> Self {
        Reason::msg(message)
    }
}

impl From<String> for Reason {
    fn from(message: String) -> Self {
        Reason::msg(message)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);
