use thiserror::Error;

/// Errors raised by the pool itself, as opposed to errors returned by jobs.
///
/// Variants are plain sentinels and can be compared with `==`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool is already running, no more jobs can be added or dispatched")]
  AlreadyRunning,

  #[error("Failed to acquire a worker slot for the job")]
  AcquisitionFailed,

  #[error("No Tokio runtime available to run the pool on")]
  NoRuntime,
}

/// The error half of a [`JobResult`](crate::JobResult) outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError<E> {
  /// The pool could not run the job (e.g. admission failed).
  #[error(transparent)]
  Pool(#[from] PoolError),

  /// The job ran and returned an error of its own.
  #[error("Job returned an error: {0}")]
  Job(E),
}

impl<E> JobError<E> {
  /// Returns the job's own error, if this is not a pool-level failure.
  pub fn job_error(&self) -> Option<&E> {
    match self {
      JobError::Job(e) => Some(e),
      JobError::Pool(_) => None,
    }
  }

  pub fn is_acquisition_failure(&self) -> bool {
    matches!(self, JobError::Pool(PoolError::AcquisitionFailed))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentinels_compare_by_identity() {
    assert_eq!(PoolError::AlreadyRunning, PoolError::AlreadyRunning);
    assert_ne!(PoolError::AlreadyRunning, PoolError::AcquisitionFailed);
  }

  #[test]
  fn no_runtime_has_its_own_message() {
    assert_ne!(PoolError::NoRuntime, PoolError::AlreadyRunning);
    assert_eq!(
      PoolError::NoRuntime.to_string(),
      "No Tokio runtime available to run the pool on"
    );
    let err: JobError<String> = PoolError::NoRuntime.into();
    assert!(!err.is_acquisition_failure());
  }

  #[test]
  fn job_error_wraps_pool_error() {
    let err: JobError<String> = PoolError::AcquisitionFailed.into();
    assert!(err.is_acquisition_failure());
    assert_eq!(err.job_error(), None);
    assert_eq!(err.to_string(), "Failed to acquire a worker slot for the job");

    let err = JobError::Job("boom".to_string());
    assert!(!err.is_acquisition_failure());
    assert_eq!(err.job_error().map(String::as_str), Some("boom"));
    assert_eq!(err.to_string(), "Job returned an error: boom");
  }
}
