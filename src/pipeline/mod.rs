//! Content enrichment pipeline.
//!
//! - `queue`: durable, at-least-once job queue with backoff retry
//! - `worker`: per-kind enrichment plus the best-effort embedding step

pub mod queue;
pub mod worker;

pub use queue::{job_id, Job, JobQueue, JobStatus};
pub use worker::EnrichmentWorker;
