//! A Tokio-based runner for batches of independent jobs with a bounded number
//! of jobs in flight, one result per job, and panics captured as faults.

mod admission;
mod completion;
mod config;
mod error;
mod job;
mod pool;
mod worker;

pub use config::PoolConfig;
pub use error::{JobError, PoolError};
pub use job::{BlockingJob, Fault, JobFuture, JobId, JobResult, PoolOutcome};
pub use pool::JobPool;
