use crate::completion::OutcomeSinks;
use crate::error::JobError;
use crate::job::{Fault, Job, JobId, JobResult};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, trace};

/// Jobs currently executing, keyed by id, with their start time.
pub(crate) type ActiveJobs = Arc<DashMap<JobId, Instant>>;

/// Removes a job from the active map when the worker exits, on every path.
struct ActiveJobGuard {
  active: ActiveJobs,
  job_id: JobId,
}

impl ActiveJobGuard {
  fn enter(active: ActiveJobs, job_id: JobId) -> Self {
    active.insert(job_id, Instant::now());
    Self { active, job_id }
  }
}

impl Drop for ActiveJobGuard {
  fn drop(&mut self) {
    if let Some((_, started_at)) = self.active.remove(&self.job_id) {
      trace!(job_id = %self.job_id, elapsed = ?started_at.elapsed(), "Job left the active set.");
    }
  }
}

/// Everything a worker needs besides the job itself.
pub(crate) struct Worker<T, E> {
  pub(crate) job_id: JobId,
  pub(crate) sinks: OutcomeSinks<T, E>,
  pub(crate) active: ActiveJobs,
}

impl<T, E> Worker<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Runs one job to completion and publishes its outcome.
  ///
  /// The permit and the active-set entry are released when this future
  /// finishes or is dropped. A panic inside the job becomes a [`Fault`] and
  /// never escapes.
  pub(crate) async fn run(self, job: Job<T, E>, permit: OwnedSemaphorePermit) {
    let _permit = permit;
    let _active = ActiveJobGuard::enter(self.active.clone(), self.job_id);
    let job_id = self.job_id;

    match Self::execute(job).await {
      Ok(Some(outcome)) => {
        trace!(%job_id, ok = outcome.is_ok(), "Job returned.");
        self.sinks.publish_result(JobResult {
          job_id,
          outcome: outcome.map_err(JobError::Job),
        });
      }
      Ok(None) => {
        error!(%job_id, "Blocking job was cancelled by the runtime.");
        self.sinks.publish_fault(Fault::cancelled(job_id));
      }
      Err(payload) => {
        let fault = Fault::from_panic(job_id, payload);
        error!(%job_id, message = %fault.message(), "Job panicked during execution.");
        self.sinks.publish_fault(fault);
      }
    }
  }

  /// `Ok(None)` means the blocking thread was cancelled without a result.
  async fn execute(job: Job<T, E>) -> Result<Option<Result<T, E>>, Box<dyn Any + Send + 'static>> {
    match job {
      Job::Async(future) => AssertUnwindSafe(future).catch_unwind().await.map(Some),
      Job::Blocking(work) => {
        let joined = tokio::task::spawn_blocking(move || panic::catch_unwind(AssertUnwindSafe(work))).await;
        match joined {
          Ok(caught) => caught.map(Some),
          Err(join_error) if join_error.is_panic() => Err(join_error.into_panic()),
          Err(_cancelled) => Ok(None),
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::completion::outcome_channels;
  use std::sync::Arc;
  use tokio::sync::Semaphore;

  fn worker(job_id: JobId, sinks: &OutcomeSinks<u32, String>, active: &ActiveJobs) -> Worker<u32, String> {
    Worker {
      job_id,
      sinks: sinks.clone(),
      active: active.clone(),
    }
  }

  #[tokio::test]
  async fn every_exit_path_releases_the_permit() {
    let semaphore = Arc::new(Semaphore::new(3));
    let active: ActiveJobs = Arc::new(DashMap::new());
    let (sinks, drain) = outcome_channels::<u32, String>(3);

    let ok = Job::Async(Box::pin(async { Ok::<u32, String>(1) }));
    let failed = Job::Async(Box::pin(async { Err::<u32, String>("bad input".to_string()) }));
    let panicked = Job::Blocking(Box::new(|| -> Result<u32, String> { panic!("blocking job blew up") }));

    for (job_id, job) in [ok, failed, panicked].into_iter().enumerate() {
      let permit = semaphore.clone().acquire_owned().await.unwrap();
      worker(job_id, &sinks, &active).run(job, permit).await;
    }

    assert_eq!(semaphore.available_permits(), 3);
    assert!(active.is_empty());

    let outcome = drain.drain().await;
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.contains(&JobResult { job_id: 0, outcome: Ok(1) }));
    assert!(outcome.results.contains(&JobResult {
      job_id: 1,
      outcome: Err(JobError::Job("bad input".to_string())),
    }));
    assert_eq!(outcome.faults.len(), 1);
    assert_eq!(outcome.faults[0].job_id, 2);
    assert_eq!(outcome.faults[0].message(), "blocking job blew up");
  }

  #[tokio::test]
  async fn async_panic_is_captured_as_fault() {
    let semaphore = Arc::new(Semaphore::new(1));
    let active: ActiveJobs = Arc::new(DashMap::new());
    let (sinks, drain) = outcome_channels::<u32, String>(1);

    let job = Job::Async(Box::pin(async {
      tokio::task::yield_now().await;
      panic!("async job blew up {}", 7);
      #[allow(unreachable_code)]
      Ok::<u32, String>(0)
    }));
    let permit = semaphore.clone().acquire_owned().await.unwrap();
    worker(0, &sinks, &active).run(job, permit).await;

    let (results, faults) = drain.drain().await.into_parts();
    assert!(results.is_empty());
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].message(), "async job blew up 7");
    assert_eq!(semaphore.available_permits(), 1);
  }
}
