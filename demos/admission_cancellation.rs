use batch_orchestra::{JobPool, PoolConfig};
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Admission Cancellation Example ---");

  // One slot: the first job holds it while the rest queue up behind admission.
  let pool = JobPool::<usize, String>::with_config(PoolConfig::new(1).with_name("cancellable_pool"));
  for i in 0..5 {
    pool
      .add_job(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(i)
      })
      .expect("Failed to add job");
  }

  let token = pool.admission_token();
  pool.start().expect("Pool already running");

  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(450)).await;
    info!("Cancelling admission; jobs not yet admitted will fail.");
    token.cancel();
  });

  let outcome = pool.join().await.expect("No Tokio runtime");
  for result in &outcome.results {
    match &result.outcome {
      Ok(value) => info!("Job {} ran: {}", result.job_id, value),
      Err(e) if e.is_acquisition_failure() => info!("Job {} was never admitted.", result.job_id),
      Err(e) => info!("Job {} failed: {}", result.job_id, e),
    }
  }

  // A pool with a zero admission timeout never waits for a slot.
  let try_pool = JobPool::<usize, String>::with_config(
    PoolConfig::new(0).with_admission_timeout(Duration::ZERO),
  );
  try_pool.add_job(async { Ok(1) }).expect("Failed to add job");
  let outcome = try_pool.wait().await.expect("Pool already running");
  info!("Zero-worker pool results: {:?}", outcome.results);
  info!("--- Admission Cancellation Example End ---");
}
