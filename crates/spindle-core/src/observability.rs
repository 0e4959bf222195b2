//! Observability - point-in-time counter views.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounts {
    pub pending: usize,
    pub fulfilled: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionStats {
    /// Identifiers with live listeners.
    pub watched: usize,
    pub recomputations: u64,
    pub publications: u64,
}
