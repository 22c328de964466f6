use crate::error::PoolError;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Bounds how many jobs execute at once.
///
/// A permit is handed to each admitted worker and released when the worker
/// drops it. Acquisition can be cut short by the cancellation token or by the
/// optional timeout; either way the caller gets `AcquisitionFailed`.
#[derive(Debug, Clone)]
pub(crate) struct AdmissionController {
  semaphore: Arc<Semaphore>,
  token: CancellationToken,
  timeout: Option<Duration>,
}

impl AdmissionController {
  pub(crate) fn new(max_workers: usize, timeout: Option<Duration>) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(max_workers)),
      token: CancellationToken::new(),
      timeout,
    }
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) fn available_permits(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit, PoolError> {
    let acquire = self.semaphore.clone().acquire_owned();

    let acquired = tokio::select! {
      biased;
      _ = self.token.cancelled() => {
        trace!("Admission cancelled by token.");
        return Err(PoolError::AcquisitionFailed);
      }
      acquired = async {
        match self.timeout {
          // `timeout` polls the inner future before checking the deadline, so a
          // zero timeout still admits when a permit is free.
          Some(limit) => tokio::time::timeout(limit, acquire).await.ok(),
          None => Some(acquire.await),
        }
      } => acquired,
    };

    match acquired {
      Some(Ok(permit)) => Ok(permit),
      Some(Err(_closed)) => {
        trace!("Admission semaphore closed.");
        Err(PoolError::AcquisitionFailed)
      }
      None => {
        trace!(timeout = ?self.timeout, "Admission timed out.");
        Err(PoolError::AcquisitionFailed)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn permits_are_returned_on_drop() {
    let admission = AdmissionController::new(2, None);
    let first = admission.acquire().await.unwrap();
    let _second = admission.acquire().await.unwrap();
    assert_eq!(admission.available_permits(), 0);

    drop(first);
    assert_eq!(admission.available_permits(), 1);
  }

  #[tokio::test]
  async fn cancelled_token_fails_even_with_free_permits() {
    let admission = AdmissionController::new(1, None);
    admission.token().cancel();
    assert_eq!(admission.acquire().await.unwrap_err(), PoolError::AcquisitionFailed);
    assert_eq!(admission.available_permits(), 1);
  }

  #[tokio::test]
  async fn zero_timeout_is_a_try_acquire() {
    let admission = AdmissionController::new(1, Some(Duration::ZERO));
    let held = admission.acquire().await.unwrap();
    assert_eq!(admission.acquire().await.unwrap_err(), PoolError::AcquisitionFailed);

    drop(held);
    assert!(admission.acquire().await.is_ok());
  }

  #[tokio::test]
  async fn cancellation_unblocks_a_waiting_acquire() {
    let admission = AdmissionController::new(0, None);
    let waiter = {
      let admission = admission.clone();
      tokio::spawn(async move { admission.acquire().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    admission.token().cancel();
    let result = tokio::time::timeout(Duration::from_millis(500), waiter)
      .await
      .expect("acquire did not observe cancellation")
      .unwrap();
    assert_eq!(result.unwrap_err(), PoolError::AcquisitionFailed);
  }
}
