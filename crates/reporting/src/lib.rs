//! Reporting — read-only aggregation of campaign outcomes per trigger.

pub mod report;

pub use report::{Reporter, TriggerReport, VariantStats};
