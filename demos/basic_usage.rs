use batch_orchestra::JobPool;
use std::time::Duration;
use tracing::info;

async fn my_job_fn(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Job {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 3 {
    return Err(format!("Job {} could not finish", id));
  }
  Ok(format!("Job {} finished successfully after {}ms", id, delay_ms))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let pool = JobPool::<String, String>::new(
    5, // Expected number of jobs
    2, // Max concurrent jobs
  );

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 100);
    match pool.add_job(my_job_fn(i, sleep_duration)) {
      Ok(job_id) => info!("Added job {}", job_id),
      Err(e) => tracing::error!("Failed to add job {}: {:?}", i, e),
    }
  }

  info!("All jobs added. Running batch...");
  let outcome = pool.wait().await.expect("Pool was already started");

  for result in &outcome.results {
    match &result.outcome {
      Ok(value) => info!("Result for job {}: {}", result.job_id, value),
      Err(e) => info!("Error for job {}: {}", result.job_id, e),
    }
  }
  info!("Faults: {}", outcome.faults.len());
  info!("--- Basic Usage Example End ---");
}
