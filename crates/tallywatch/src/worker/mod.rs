//! Job model, priority queue and the worker pool.

pub mod job;
pub mod pool;
pub mod queue;

pub use job::{JobKind, JobOutcome, JobPriority, JobStatus, WorkerJob};
pub use pool::WorkerPool;
pub use queue::JobQueue;
