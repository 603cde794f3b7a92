//! mfp-summary - flow-run summary aggregation
//!
//! Reads log rows from the tracking table, resolves each referenced flow
//! run against the orchestrator API and SLURM accounting, and appends one
//! summary row per finished run.

pub mod aggregator;
pub mod orchestrator;
pub mod slurm;

pub use aggregator::{Aggregator, SummaryError, SummaryStats};
