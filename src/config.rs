use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::runtime::Handle as TokioHandle;

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Configuration for a [`JobPool`](crate::JobPool).
#[derive(Clone, Debug)]
pub struct PoolConfig {
  /// Name used in log fields. Unnamed pools get `batch_pool-<n>`.
  pub name: Option<String>,
  /// Maximum number of jobs executing at the same time.
  pub max_workers: usize,
  /// Expected number of jobs, used to pre-size the job list.
  pub job_capacity: usize,
  /// Upper bound on how long a job may wait for a worker slot.
  /// `Some(Duration::ZERO)` turns admission into a try-acquire.
  pub admission_timeout: Option<Duration>,
  /// Runtime to spawn the dispatch loop and workers on. Defaults to the
  /// runtime current at `start()`.
  pub runtime: Option<TokioHandle>,
}

impl PoolConfig {
  pub fn new(max_workers: usize) -> Self {
    Self {
      max_workers,
      ..Self::default()
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_job_capacity(mut self, job_capacity: usize) -> Self {
    self.job_capacity = job_capacity;
    self
  }

  pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
    self.admission_timeout = Some(timeout);
    self
  }

  pub fn with_runtime(mut self, handle: TokioHandle) -> Self {
    self.runtime = Some(handle);
    self
  }

  pub(crate) fn resolve_name(&self) -> String {
    match &self.name {
      Some(name) => name.clone(),
      None => format!(
        "batch_pool-{}",
        NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
      ),
    }
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: None,
      max_workers: 1,
      job_capacity: 0,
      admission_timeout: None,
      runtime: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_sets_fields() {
    let config = PoolConfig::new(4)
      .with_name("loader")
      .with_job_capacity(16)
      .with_admission_timeout(Duration::from_millis(5));

    assert_eq!(config.max_workers, 4);
    assert_eq!(config.job_capacity, 16);
    assert_eq!(config.admission_timeout, Some(Duration::from_millis(5)));
    assert_eq!(config.resolve_name(), "loader");
  }

  #[test]
  fn unnamed_pools_get_distinct_names() {
    let config = PoolConfig::default();
    let first = config.resolve_name();
    let second = config.resolve_name();
    assert!(first.starts_with("batch_pool-"));
    assert_ne!(first, second);
  }
}
