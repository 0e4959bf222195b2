//! Domain model: ids, document values, handle states, equality and errors.

pub mod equality;
pub mod errors;
pub mod ids;
pub mod state;
pub mod value;

pub use self::equality::{StructuralEq, deep_equal, structural_eq};
pub use self::errors::{IdError, Reason, ResolveError, SelectionError, StoreError};
pub use self::ids::{AnyDocumentId, DocumentId, Id, IdMarker, ResourceUrl, to_canonical};
pub use self::state::{EventPayload, HandleEvent, HandleInfo, HandleState};
pub use self::value::{Key, Value, ValueKind};
