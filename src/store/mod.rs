pub mod conversations;
pub mod notifications;
pub mod pagination;
pub mod timeline;

pub use conversations::ConversationDirectory;
pub use notifications::NotificationCenter;
pub use pagination::{CursorController, PageRequest};
pub use timeline::{
    AppendOutcome, MessageIdentity, ReconcileOutcome, TimelineEntry, TimelinePhase, TimelineStore,
};
