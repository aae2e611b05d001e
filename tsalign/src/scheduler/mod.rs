//! Streaming scheduling of tilt series.

mod service;
mod state;

pub use service::{RunSummary, SchedulerConfig, StreamingScheduler};
pub use state::{Discrepancy, IterationPlan, SharedState, multiset_discrepancy};
