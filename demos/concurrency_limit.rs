use batch_orchestra::{JobPool, PoolConfig};
use std::time::{Duration, Instant};
use tracing::info;

async fn long_job_fn(id: usize) -> Result<String, String> {
  info!("Job {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  let result = format!("Job {} finished", id);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let num_jobs = 5;
  let pool = JobPool::<String, String>::with_config(
    PoolConfig::new(concurrency_limit)
      .with_name("concurrency_pool")
      .with_job_capacity(num_jobs),
  );

  info!(
    "Adding {} jobs, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_jobs,
    concurrency_limit,
    (num_jobs as f32 / concurrency_limit as f32).ceil()
  );

  for i in 0..num_jobs {
    pool.add_job(long_job_fn(i)).expect("Pool already running");
  }

  let started_at = Instant::now();
  pool.start().expect("Pool already running");
  tokio::time::sleep(Duration::from_millis(100)).await;
  info!(
    "Active jobs: {}, free slots: {}",
    pool.active_job_count(),
    pool.available_permits()
  );

  let outcome = pool.join().await.expect("No Tokio runtime");
  for result in &outcome.results {
    info!("Job {} main: Received {:?}", result.job_id, result.outcome);
  }

  info!("All jobs processed in {:?}.", started_at.elapsed());
  info!("--- Concurrency Limit Example End ---");
}
