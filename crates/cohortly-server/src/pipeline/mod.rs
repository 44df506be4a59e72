//! The stats pipeline: per-user compilation, cohort aggregation and the job
//! runner that sequences them with the external mergers.

pub mod aggregator;
pub mod compiler;
pub mod orchestrator;

pub use orchestrator::{JobKind, JobOutcome, JobStatus, Orchestrator};
