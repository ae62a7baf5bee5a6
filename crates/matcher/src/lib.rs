//! Trigger matching — scans the user population against each active
//! trigger's condition and enqueues first-step work items.

pub mod conditions;
pub mod matcher;

pub use matcher::{MatchSummary, TriggerMatcher};
