//! Domain models for replicated accounting entities and sync bookkeeping

mod entity;
mod history;
mod object_type;
mod sync_state;
mod token;

pub use entity::EntityRecord;
pub use history::{FailureKind, SyncHistoryRecord, SyncOutcome};
pub use object_type::ObjectType;
pub use sync_state::{SyncState, SyncStatus};
pub use token::{Token, TokenGrant};
