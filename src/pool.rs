use crate::admission::AdmissionController;
use crate::completion::{outcome_channels, CompletionBarrier, OutcomeDrain, OutcomeSinks};
use crate::config::PoolConfig;
use crate::error::{JobError, PoolError};
use crate::job::{Job, JobId, JobResult, PoolOutcome};
use crate::worker::{ActiveJobs, Worker};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A batch of independent jobs run with a fixed concurrency ceiling.
///
/// Jobs are added while the pool is idle, then [`start`](JobPool::start)
/// dispatches them in submission order and [`join`](JobPool::join) waits for
/// every one to finish. Each job yields exactly one [`JobResult`], unless it
/// panics, in which case it yields one [`Fault`](crate::Fault) instead.
pub struct JobPool<T, E> {
  pool_name: Arc<String>,
  config: PoolConfig,
  jobs: Mutex<Vec<Job<T, E>>>,
  started: AtomicBool,
  admission: AdmissionController,
  barrier: CompletionBarrier,
  active_jobs: ActiveJobs,
  dispatch: Mutex<Option<Dispatch<T, E>>>,
}

/// State created by `start` and consumed by `join`.
struct Dispatch<T, E> {
  loop_handle: JoinHandle<()>,
  drain: OutcomeDrain<T, E>,
}

impl<T, E> JobPool<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Creates a pool expecting about `job_capacity` jobs and running at most
  /// `max_workers` of them at once.
  pub fn new(job_capacity: usize, max_workers: usize) -> Self {
    Self::with_config(PoolConfig::new(max_workers).with_job_capacity(job_capacity))
  }

  pub fn with_config(config: PoolConfig) -> Self {
    let pool_name = Arc::new(config.resolve_name());
    if config.max_workers == 0 && config.admission_timeout.is_none() {
      warn!(
        pool_name = %pool_name,
        "Pool created with zero workers and no admission timeout. Jobs will wait for admission until the admission token is cancelled."
      );
    }

    Self {
      admission: AdmissionController::new(config.max_workers, config.admission_timeout),
      jobs: Mutex::new(Vec::with_capacity(config.job_capacity)),
      started: AtomicBool::new(false),
      barrier: CompletionBarrier::new(),
      active_jobs: Arc::new(DashMap::new()),
      dispatch: Mutex::new(None),
      pool_name,
      config,
    }
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn max_workers(&self) -> usize {
    self.config.max_workers
  }

  pub fn is_started(&self) -> bool {
    self.started.load(AtomicOrdering::Acquire)
  }

  /// Number of jobs submitted and not yet handed to the dispatch loop.
  pub fn job_count(&self) -> usize {
    self.jobs.lock().len()
  }

  /// Number of jobs executing right now.
  pub fn active_job_count(&self) -> usize {
    self.active_jobs.len()
  }

  /// Worker slots currently free.
  pub fn available_permits(&self) -> usize {
    self.admission.available_permits()
  }

  /// Token that aborts admission when cancelled. Jobs still waiting for a
  /// slot, and any not yet reached by the dispatch loop, then fail with
  /// `AcquisitionFailed`. Jobs already running are unaffected.
  pub fn admission_token(&self) -> CancellationToken {
    self.admission.token().clone()
  }

  pub fn cancel_admission(&self) {
    info!(pool_name = %self.pool_name, "Admission cancelled. Remaining jobs will not be dispatched.");
    self.admission.token().cancel();
  }

  /// Adds an async job. Returns its id, which is its submission index.
  pub fn add_job<F>(&self, job: F) -> Result<JobId, PoolError>
  where
    F: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.push(Job::Async(Box::pin(job)))
  }

  /// Adds a job that runs on Tokio's blocking thread pool.
  pub fn add_blocking_job<F>(&self, job: F) -> Result<JobId, PoolError>
  where
    F: FnOnce() -> Result<T, E> + Send + 'static,
  {
    self.push(Job::Blocking(Box::new(job)))
  }

  /// Adds several async jobs, stopping at the first rejection.
  pub fn add_jobs<I, F>(&self, jobs: I) -> Result<Vec<JobId>, PoolError>
  where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
  {
    jobs.into_iter().map(|job| self.add_job(job)).collect()
  }

  fn push(&self, job: Job<T, E>) -> Result<JobId, PoolError> {
    // `start` flips the flag before it takes the list, so checking under the
    // lock means a job is either dispatched or rejected, never lost.
    let mut jobs = self.jobs.lock();
    if self.is_started() {
      warn!(pool_name = %self.pool_name, "Attempted to add a job to a pool that is already running.");
      return Err(PoolError::AlreadyRunning);
    }
    let job_id = jobs.len();
    jobs.push(job);
    trace!(pool_name = %self.pool_name, %job_id, "Job added.");
    Ok(job_id)
  }

  /// Begins dispatching jobs in submission order.
  ///
  /// Returns immediately; the dispatch loop runs on the pool's runtime.
  ///
  /// # Errors
  /// Returns `PoolError::AlreadyRunning` if the pool was already started, and
  /// `PoolError::NoRuntime` if no runtime was configured and this is called
  /// outside a Tokio runtime. In the latter case the pool stays unstarted and
  /// keeps its jobs.
  pub fn start(&self) -> Result<(), PoolError> {
    let dispatch = self.begin_dispatch()?;
    *self.dispatch.lock() = Some(dispatch);
    Ok(())
  }

  fn begin_dispatch(&self) -> Result<Dispatch<T, E>, PoolError> {
    // Resolved before the flag flips so a missing runtime leaves the pool untouched.
    let runtime = match &self.config.runtime {
      Some(handle) => handle.clone(),
      None => TokioHandle::try_current().map_err(|e| {
        warn!(pool_name = %self.pool_name, "Cannot start pool outside a Tokio runtime: {}", e);
        PoolError::NoRuntime
      })?,
    };

    if self
      .started
      .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_err()
    {
      warn!(pool_name = %self.pool_name, "Start called on a pool that is already running.");
      return Err(PoolError::AlreadyRunning);
    }

    let jobs = std::mem::take(&mut *self.jobs.lock());
    let (sinks, drain) = outcome_channels::<T, E>(jobs.len());

    info!(
      pool_name = %self.pool_name,
      jobs = jobs.len(),
      max_workers = self.config.max_workers,
      "Starting job dispatch."
    );

    let dispatch_loop = Self::run_dispatch_loop(
      self.pool_name.clone(),
      jobs,
      self.admission.clone(),
      self.barrier.clone(),
      sinks,
      self.active_jobs.clone(),
      runtime.clone(),
    )
    .instrument(info_span!("job_pool_dispatch", pool_name = %self.pool_name));

    let loop_handle = runtime.spawn(dispatch_loop);
    Ok(Dispatch { loop_handle, drain })
  }

  /// Waits for every dispatched job and returns what the batch produced.
  ///
  /// Starts the pool first if `start` was never called.
  ///
  /// If the dispatch loop itself is torn down (for instance because the
  /// configured runtime shut down), jobs it had not reached yet produce
  /// neither a result nor a fault; the failure is only logged.
  ///
  /// # Errors
  /// Returns `PoolError::NoRuntime` if the pool had to be started here and no
  /// Tokio runtime is available.
  pub async fn join(self) -> Result<PoolOutcome<T, E>, PoolError> {
    // `start` stores its dispatch state before returning, and `self` is owned
    // here, so an absent state means the pool was never started.
    let taken = self.dispatch.lock().take();
    let Dispatch { loop_handle, drain } = match taken {
      Some(dispatch) => dispatch,
      None => self.begin_dispatch()?,
    };

    if let Err(join_error) = loop_handle.await {
      error!(pool_name = %self.pool_name, "Dispatch loop did not finish cleanly: {:?}", join_error);
    }

    debug!(pool_name = %self.pool_name, pending = self.barrier.pending(), "Dispatch finished. Waiting for workers.");
    self.barrier.wait().await;

    let outcome = drain.drain().await;
    info!(
      pool_name = %self.pool_name,
      results = outcome.results.len(),
      faults = outcome.faults.len(),
      "All jobs finished."
    );
    Ok(outcome)
  }

  /// Starts the pool and waits for it: the one-call form of `start` + `join`.
  ///
  /// # Errors
  /// Returns `PoolError::AlreadyRunning` if `start` had already been called
  /// (use `join` in that case), or `PoolError::NoRuntime` as for `start`.
  pub async fn wait(self) -> Result<PoolOutcome<T, E>, PoolError> {
    self.start()?;
    self.join().await
  }

  async fn run_dispatch_loop(
    pool_name: Arc<String>,
    jobs: Vec<Job<T, E>>,
    admission: AdmissionController,
    barrier: CompletionBarrier,
    sinks: OutcomeSinks<T, E>,
    active_jobs: ActiveJobs,
    runtime: TokioHandle,
  ) {
    let total = jobs.len();
    let mut admission_failures = 0usize;

    for (job_id, job) in jobs.into_iter().enumerate() {
      let permit = match admission.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
          debug!(pool_name = %*pool_name, %job_id, "Admission failed: {}", e);
          admission_failures += 1;
          sinks.publish_result(JobResult {
            job_id,
            outcome: Err(JobError::Pool(e)),
          });
          continue;
        }
      };
      trace!(pool_name = %*pool_name, %job_id, available = admission.available_permits(), "Admitted job.");

      let worker = Worker {
        job_id,
        sinks: sinks.clone(),
        active: active_jobs.clone(),
      };
      barrier.spawn_on(
        worker
          .run(job, permit)
          .instrument(info_span!("pool_job", pool_name = %*pool_name, %job_id)),
        &runtime,
      );
    }

    info!(
      pool_name = %*pool_name,
      total,
      dispatched = total - admission_failures,
      admission_failures,
      "Dispatch loop finished."
    );
  }
}

impl<T, E> std::fmt::Debug for JobPool<T, E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobPool")
      .field("pool_name", &self.pool_name)
      .field("max_workers", &self.config.max_workers)
      .field("started", &self.started.load(AtomicOrdering::Relaxed))
      .field("active_jobs", &self.active_jobs.len())
      .finish_non_exhaustive()
  }
}
