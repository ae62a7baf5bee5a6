//! Queue processing — claims due work items, applies cancellation rules,
//! personalizes and delivers, and schedules follow-up steps. The activity
//! watcher cancels campaigns for users who came back on their own.

pub mod processor;
pub mod watcher;

pub use processor::{ProcessSummary, QueueProcessor};
pub use watcher::{ActivityWatcher, CancelSummary};
