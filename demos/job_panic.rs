use batch_orchestra::JobPool;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Job Panic Example ---");

  let pool = JobPool::<u32, String>::new(3, 2);

  pool.add_job(async { Ok(1) }).expect("Failed to add job");
  pool
    .add_job(async { Err("err_x".to_string()) })
    .expect("Failed to add job");
  pool
    .add_job(async {
      info!("Panicking Job: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      info!("Panicking Job: About to panic!");
      panic!("This job is designed to panic!");
      #[allow(unreachable_code)]
      Ok(0)
    })
    .expect("Failed to add panicking job");

  let (results, faults) = pool.wait().await.expect("Pool already running").into_parts();

  // The panicking job shows up only among the faults.
  info!("{} results:", results.len());
  for result in results {
    info!("  job {}: {:?}", result.job_id, result.outcome);
  }
  info!("{} faults:", faults.len());
  for fault in faults {
    info!("  {}", fault);
  }
  info!("--- Job Panic Example End ---");
}
