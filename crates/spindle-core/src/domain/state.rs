//! Handle lifecycle states and the events a handle emits.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::ResourceUrl;
use super::value::Value;

/// Lifecycle of a document handle.
///
/// State transitions observed by the core:
/// - Loading -> Ready
/// - Loading -> Unavailable
/// - Ready -> Deleted
///
/// Unavailable and Deleted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Loading,
    Ready,
    Unavailable,
    Deleted,
}

impl HandleState {
    /// States that end a wait for readiness one way or the other.
    pub const SETTLED: [HandleState; 3] = [
        HandleState::Ready,
        HandleState::Unavailable,
        HandleState::Deleted,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, HandleState::Unavailable | HandleState::Deleted)
    }

    pub fn can_transition_to(self, next: HandleState) -> bool {
        matches!(
            (self, next),
            (HandleState::Loading, HandleState::Ready)
                | (HandleState::Loading, HandleState::Unavailable)
                | (HandleState::Ready, HandleState::Deleted)
        )
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleState::Loading => "loading",
            HandleState::Ready => "ready",
            HandleState::Unavailable => "unavailable",
            HandleState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Event kinds a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleEvent {
    Change,
    Delete,
}

/// What a listener receives.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Change { url: ResourceUrl, doc: Value },
    Delete { url: ResourceUrl },
}

impl EventPayload {
    pub fn kind(&self) -> HandleEvent {
        match self {
            EventPayload::Change { .. } => HandleEvent::Change,
            EventPayload::Delete { .. } => HandleEvent::Delete,
        }
    }

    pub fn url(&self) -> ResourceUrl {
        match self {
            EventPayload::Change { url, .. } | EventPayload::Delete { url } => *url,
        }
    }
}

/// Snapshot of one watched handle, as fed to a selector.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub url: ResourceUrl,
    pub state: HandleState,
    pub value: Option<Value>,
}
