use crate::error::JobError;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Identity of a job: its index in submission order.
pub type JobId = usize;

/// The type of future an async job runs.
/// It must be `Send` and `'static`, and produce a `Result<T, E>`.
pub type JobFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// A closure run on Tokio's blocking thread pool.
pub type BlockingJob<T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'static>;

/// A unit of work held by the pool until dispatch.
pub(crate) enum Job<T, E> {
  Async(JobFuture<T, E>),
  Blocking(BlockingJob<T, E>),
}

impl<T, E> fmt::Debug for Job<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Job::Async(_) => f.write_str("Job::Async"),
      Job::Blocking(_) => f.write_str("Job::Blocking"),
    }
  }
}

/// The recorded outcome of one job, or of a failed admission for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult<T, E> {
  pub job_id: JobId,
  pub outcome: Result<T, JobError<E>>,
}

impl<T, E> JobResult<T, E> {
  pub fn value(&self) -> Option<&T> {
    self.outcome.as_ref().ok()
  }

  pub fn error(&self) -> Option<&JobError<E>> {
    self.outcome.as_ref().err()
  }

  pub fn is_ok(&self) -> bool {
    self.outcome.is_ok()
  }
}

/// A panic captured at a worker boundary.
///
/// A faulted job produces no [`JobResult`]; its fault is reported here instead so
/// that a programming defect is never mistaken for an ordinary job error.
pub struct Fault {
  pub job_id: JobId,
  message: String,
  payload: Box<dyn Any + Send + 'static>,
}

impl Fault {
  pub(crate) fn from_panic(job_id: JobId, payload: Box<dyn Any + Send + 'static>) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "<non-string panic payload>".to_string()
    };
    Self { job_id, message, payload }
  }

  pub(crate) fn cancelled(job_id: JobId) -> Self {
    let message = "job was cancelled by the runtime before completing".to_string();
    Self {
      job_id,
      payload: Box::new(message.clone()),
      message,
    }
  }

  /// The panic message, when the payload was a string.
  pub fn message(&self) -> &str {
    &self.message
  }

  pub fn payload(&self) -> &(dyn Any + Send + 'static) {
    &*self.payload
  }

  /// Hands back the raw payload, e.g. for `std::panic::resume_unwind`.
  pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
    self.payload
  }
}

impl fmt::Debug for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Fault")
      .field("job_id", &self.job_id)
      .field("message", &self.message)
      .finish_non_exhaustive()
  }
}

impl fmt::Display for Fault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "job {} panicked: {}", self.job_id, self.message)
  }
}

/// Everything a batch produced, drained after the last worker finished.
///
/// Entries are in completion order, not submission order.
#[derive(Debug)]
pub struct PoolOutcome<T, E> {
  pub results: Vec<JobResult<T, E>>,
  pub faults: Vec<Fault>,
}

impl<T, E> PoolOutcome<T, E> {
  pub fn into_parts(self) -> (Vec<JobResult<T, E>>, Vec<Fault>) {
    (self.results, self.faults)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fault_extracts_string_messages() {
    let fault = Fault::from_panic(3, Box::new("static message"));
    assert_eq!(fault.job_id, 3);
    assert_eq!(fault.message(), "static message");

    let fault = Fault::from_panic(4, Box::new(format!("owned {}", 42)));
    assert_eq!(fault.message(), "owned 42");
    assert_eq!(fault.to_string(), "job 4 panicked: owned 42");
  }

  #[test]
  fn fault_keeps_opaque_payload() {
    let fault = Fault::from_panic(0, Box::new(17u32));
    assert_eq!(fault.message(), "<non-string panic payload>");
    assert_eq!(fault.payload().downcast_ref::<u32>(), Some(&17));
    assert_eq!(fault.into_payload().downcast::<u32>().ok().map(|b| *b), Some(17));
  }
}
