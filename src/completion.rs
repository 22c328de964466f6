use crate::job::{Fault, JobId, JobResult, PoolOutcome};

use std::future::Future;

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Tracks every dispatched worker so `join` can wait for all of them.
///
/// Admission failures never register here; they are published inline by the
/// dispatch loop.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionBarrier {
  tracker: TaskTracker,
}

impl CompletionBarrier {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Registers one pending unit and spawns it. The unit is released when the
  /// task finishes, however it finishes.
  pub(crate) fn spawn_on<F>(&self, task: F, handle: &TokioHandle) -> JoinHandle<F::Output>
  where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
  {
    self.tracker.spawn_on(task, handle)
  }

  pub(crate) fn pending(&self) -> usize {
    self.tracker.len()
  }

  /// Waits until every registered unit has finished. No new units may be
  /// registered afterwards.
  pub(crate) async fn wait(&self) {
    self.tracker.close();
    self.tracker.wait().await;
  }
}

/// Producer side of the result and fault sinks. One clone per worker plus the
/// dispatch loop.
pub(crate) struct OutcomeSinks<T, E> {
  results_tx: mpsc::Sender<JobResult<T, E>>,
  faults_tx: mpsc::Sender<Fault>,
}

impl<T, E> Clone for OutcomeSinks<T, E> {
  fn clone(&self) -> Self {
    Self {
      results_tx: self.results_tx.clone(),
      faults_tx: self.faults_tx.clone(),
    }
  }
}

/// Consumer side of the sinks, drained once after the barrier clears.
pub(crate) struct OutcomeDrain<T, E> {
  results_rx: mpsc::Receiver<JobResult<T, E>>,
  faults_rx: mpsc::Receiver<Fault>,
}

/// Creates both sinks with room for `job_count` entries each.
///
/// Every job publishes at most one entry, so with this sizing no publish ever
/// finds a full channel.
pub(crate) fn outcome_channels<T, E>(job_count: usize) -> (OutcomeSinks<T, E>, OutcomeDrain<T, E>) {
  // tokio's bounded channel rejects a zero capacity.
  let capacity = job_count.max(1);
  let (results_tx, results_rx) = mpsc::channel(capacity);
  let (faults_tx, faults_rx) = mpsc::channel(capacity);
  (
    OutcomeSinks { results_tx, faults_tx },
    OutcomeDrain { results_rx, faults_rx },
  )
}

impl<T, E> OutcomeSinks<T, E> {
  pub(crate) fn publish_result(&self, result: JobResult<T, E>) {
    let job_id = result.job_id;
    if let Err(e) = self.results_tx.try_send(result) {
      Self::log_publish_failure("result", job_id, &e);
    }
  }

  pub(crate) fn publish_fault(&self, fault: Fault) {
    let job_id = fault.job_id;
    if let Err(e) = self.faults_tx.try_send(fault) {
      Self::log_publish_failure("fault", job_id, &e);
    }
  }

  fn log_publish_failure<M>(kind: &str, job_id: JobId, e: &TrySendError<M>) {
    match e {
      TrySendError::Full(_) => {
        error!(%job_id, kind, "Outcome sink full. This entry is lost.");
      }
      TrySendError::Closed(_) => {
        error!(%job_id, kind, "Outcome sink closed before the job finished. This entry is lost.");
      }
    }
  }
}

impl<T, E> OutcomeDrain<T, E> {
  /// Closes both sinks and copies out everything buffered in them.
  pub(crate) async fn drain(mut self) -> PoolOutcome<T, E> {
    self.results_rx.close();
    self.faults_rx.close();

    let mut results = Vec::new();
    while let Some(result) = self.results_rx.recv().await {
      results.push(result);
    }

    let mut faults = Vec::new();
    while let Some(fault) = self.faults_rx.recv().await {
      faults.push(fault);
    }

    debug!(results = results.len(), faults = faults.len(), "Drained outcome sinks.");
    PoolOutcome { results, faults }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn drain_returns_everything_published() {
    let (sinks, drain) = outcome_channels::<u32, String>(3);
    sinks.publish_result(JobResult { job_id: 0, outcome: Ok(7) });
    sinks.publish_fault(Fault::from_panic(1, Box::new("bad")));
    sinks.clone().publish_result(JobResult {
      job_id: 2,
      outcome: Err(crate::JobError::Job("nope".to_string())),
    });

    // Live senders must not keep the drain waiting.
    let outcome = drain.drain().await;
    drop(sinks);

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.faults.len(), 1);
    assert_eq!(outcome.faults[0].job_id, 1);
  }

  #[tokio::test]
  async fn publish_after_drain_is_dropped_not_blocked() {
    let (sinks, drain) = outcome_channels::<u32, String>(1);
    let outcome = drain.drain().await;
    assert!(outcome.results.is_empty());

    sinks.publish_result(JobResult { job_id: 0, outcome: Ok(1) });
  }

  #[tokio::test]
  async fn barrier_waits_for_all_spawned_units() {
    let barrier = CompletionBarrier::new();
    let finished = Arc::new(AtomicUsize::new(0));
    let handle = TokioHandle::current();

    for i in 0..5u64 {
      let finished = finished.clone();
      barrier.spawn_on(
        async move {
          tokio::time::sleep(Duration::from_millis(10 * i)).await;
          finished.fetch_add(1, Ordering::SeqCst);
        },
        &handle,
      );
    }
    assert_eq!(barrier.pending(), 5);

    barrier.wait().await;
    assert_eq!(finished.load(Ordering::SeqCst), 5);
    assert_eq!(barrier.pending(), 0);
  }

  #[tokio::test]
  async fn barrier_releases_units_that_panic() {
    let barrier = CompletionBarrier::new();
    let handle = TokioHandle::current();
    let joined = barrier.spawn_on(async { panic!("unit failed") }, &handle);

    tokio::time::timeout(Duration::from_secs(1), barrier.wait())
      .await
      .expect("barrier stayed blocked on a panicked unit");
    assert!(joined.await.unwrap_err().is_panic());
  }
}
