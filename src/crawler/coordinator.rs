//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the dispatch loop of one crawl pass:
//! - Resuming unfinished ledger entries ahead of fresh seeds
//! - Dispatching frontier tasks to a bounded pool of workers
//! - Submitting each finished task's follow-ups before marking it finished
//! - Recording failures and dead-lettering poison tasks
//! - Handling interrupts and run bookkeeping

use crate::config::{validate_for_pass, Config};
use crate::crawler::fetcher::{FetchRequest, Fetcher, HttpFetcher};
use crate::crawler::scheduler::{Dispatch, Frontier};
use crate::ledger::Ledger;
use crate::pipeline::{for_each_seed, CrawlContext, Pipeline, SeedCount};
use crate::state::EntryStatus;
use crate::storage::{lock_storage, open_storage, shared, RunStatus, SharedStorage, Storage};
use crate::task::{CrawlPass, Task};
use crate::DeltaError;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

/// What a worker reports back for one task
struct WorkerOutcome {
    task: Task,
    result: Result<Vec<Task>, DeltaError>,
}

/// Requests a graceful stop of a running coordinator
///
/// Queued and in-flight tasks are abandoned; they stay unfinished in the
/// ledger and are resumed by the next run.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Where the startup phase left the frontier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Unfinished tasks reloaded from the ledger
    pub resumed: usize,

    pub seeds: SeedCount,
}

/// Counters of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub completed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub elapsed: Duration,
}

enum Event {
    Joined(Result<WorkerOutcome, JoinError>),
    Tick,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    pass: CrawlPass,
    storage: SharedStorage,
    frontier: Frontier,
    pipeline: Pipeline,
    fetcher: Arc<dyn Fetcher>,
    permits: Arc<Semaphore>,
    workers: JoinSet<WorkerOutcome>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown: watch::Receiver<bool>,
    run_id: i64,
    completed: u64,
    failed: u64,
    dead_lettered: u64,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded with the run
    /// * `pass` - The crawl pass to run
    /// * `storage` - Shared storage holding the ledger and the entity records
    /// * `fetcher` - The fetch collaborator
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(DeltaError)` - The configuration does not suit the pass, or the
    ///   run could not be recorded
    pub fn new(
        config: Arc<Config>,
        config_hash: &str,
        pass: CrawlPass,
        storage: SharedStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, DeltaError> {
        validate_for_pass(&config, pass)?;
        let ctx = CrawlContext::new(config, storage.clone())?;
        Self::with_context(ctx, config_hash, pass, fetcher)
    }

    /// Creates a coordinator around an already built crawl context
    pub fn with_context(
        ctx: CrawlContext,
        config_hash: &str,
        pass: CrawlPass,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, DeltaError> {
        let storage = ctx.storage.clone();
        let crawler = ctx.config.crawler.clone();

        let run_id = {
            let mut storage = lock_storage(&storage)?;
            match storage.get_latest_run(pass)? {
                Some(run) if matches!(run.status, RunStatus::Running | RunStatus::Interrupted) => {
                    tracing::info!("Resuming interrupted {} run {}", pass, run.id);
                    storage.update_run_status(run.id, RunStatus::Running)?;
                    run.id
                }
                _ => {
                    let id = storage.create_run(pass, config_hash)?;
                    tracing::info!("Starting {} run {}", pass, id);
                    id
                }
            }
        };

        let ledger = Ledger::new(storage.clone(), crawler.max_attempts);
        let (shutdown_tx, shutdown) = watch::channel(false);

        Ok(Self {
            pass,
            storage,
            frontier: Frontier::new(ledger, crawler.request_delay()),
            pipeline: Pipeline::new(Arc::new(ctx)),
            fetcher,
            permits: Arc::new(Semaphore::new(crawler.workers as usize)),
            workers: JoinSet::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown,
            run_id,
            completed: 0,
            failed: 0,
            dead_lettered: 0,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// Fills the frontier: unfinished ledger entries first, then the seeds
    ///
    /// Resumed tasks are submitted before any seed, so within a priority
    /// tier they are dispatched first.
    pub fn seed(&mut self) -> Result<SeedReport, DeltaError> {
        let pending = self.frontier.ledger().pending(self.pass)?;
        let resumed = self.frontier.submit_all(pending)?;
        if resumed > 0 {
            tracing::info!("Resuming {} unfinished {} tasks", resumed, self.pass);
        }

        let frontier = &mut self.frontier;
        let seeds = for_each_seed(self.pipeline.context(), self.pass, |task| {
            Ok(frontier.submit(task)?)
        })?;
        tracing::info!(
            "Seeded {} tasks ({} new), {} in frontier",
            seeds.produced,
            seeds.queued,
            self.frontier.len()
        );

        Ok(SeedReport { resumed, seeds })
    }

    /// Seeds the frontier and runs the dispatch loop until it drains, the
    /// run is interrupted, or a fatal error occurs
    pub async fn run(&mut self) -> Result<RunSummary, DeltaError> {
        let start_time = Instant::now();
        self.seed()?;

        let status = match self.drive(start_time).await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Run {} aborted: {}", self.run_id, e);
                self.workers.abort_all();
                if let Ok(mut storage) = lock_storage(&self.storage) {
                    let _ = storage.update_run_status(self.run_id, RunStatus::Failed);
                }
                return Err(e);
            }
        };

        {
            let mut storage = lock_storage(&self.storage)?;
            match status {
                RunStatus::Completed => storage.complete_run(self.run_id)?,
                other => storage.update_run_status(self.run_id, other)?,
            }
        }

        let summary = RunSummary {
            run_id: self.run_id,
            status,
            completed: self.completed,
            failed: self.failed,
            dead_lettered: self.dead_lettered,
            elapsed: start_time.elapsed(),
        };
        tracing::info!(
            "Run {} {}: {} tasks finished, {} failed, {} dead-lettered in {:?}",
            summary.run_id,
            summary.status.to_db_string(),
            summary.completed,
            summary.failed,
            summary.dead_lettered,
            summary.elapsed
        );

        Ok(summary)
    }

    async fn drive(&mut self, start_time: Instant) -> Result<RunStatus, DeltaError> {
        loop {
            if *self.shutdown.borrow() {
                tracing::warn!(
                    "Interrupted: abandoning {} queued and {} in-flight tasks",
                    self.frontier.len(),
                    self.workers.len()
                );
                self.workers.abort_all();
                return Ok(RunStatus::Interrupted);
            }

            let mut wait = None;
            if let Ok(permit) = self.permits.clone().try_acquire_owned() {
                match self.frontier.poll(Instant::now()) {
                    Dispatch::Ready(task) => {
                        self.spawn(task, permit);
                        continue;
                    }
                    Dispatch::Wait(duration) => wait = Some(duration),
                    Dispatch::Empty if self.workers.is_empty() => {
                        tracing::info!("Frontier is empty, {} pass complete", self.pass);
                        return Ok(RunStatus::Completed);
                    }
                    Dispatch::Empty => {}
                }
            }

            let event = tokio::select! {
                Some(joined) = self.workers.join_next() => Event::Joined(joined),
                _ = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => Event::Tick,
                _ = self.shutdown.changed() => Event::Tick,
            };

            if let Event::Joined(joined) = event {
                self.settle(joined)?;
                self.report_progress(start_time);
            }
        }
    }

    fn spawn(&mut self, task: Task, permit: OwnedSemaphorePermit) {
        let fetcher = self.fetcher.clone();
        let pipeline = self.pipeline.clone();

        self.workers.spawn(async move {
            let _permit = permit;
            let result = process_task(fetcher.as_ref(), &pipeline, &task).await;
            WorkerOutcome { task, result }
        });
    }

    /// Applies a worker's outcome to the frontier and the ledger
    fn settle(&mut self, joined: Result<WorkerOutcome, JoinError>) -> Result<(), DeltaError> {
        let WorkerOutcome { task, result } =
            joined.map_err(|e| DeltaError::Worker(e.to_string()))?;
        let ledger = self.frontier.ledger().clone();

        match result {
            Ok(follow_ups) => {
                let produced = follow_ups.len();
                let queued = self.frontier.submit_all(follow_ups)?;
                ledger.complete(&task)?;
                self.completed += 1;
                tracing::debug!(
                    "Finished {} ({} follow-ups, {} queued)",
                    task.identity,
                    produced,
                    queued
                );
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!("Task {} failed: {}", task.identity, e);
                self.failed += 1;
                if ledger.record_failure(&task, &e.to_string())? == EntryStatus::DeadLettered {
                    self.dead_lettered += 1;
                }
            }
        }

        Ok(())
    }

    fn report_progress(&self, start_time: Instant) {
        let settled = self.completed + self.failed;
        if settled == 0 || settled % 10 != 0 {
            return;
        }

        let rate = settled as f64 / start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        tracing::info!(
            "Progress: {} tasks finished, {} failed, {} in frontier, {:.2} tasks/sec",
            self.completed,
            self.failed,
            self.frontier.len(),
            rate
        );
    }
}

/// Fetches a task's page and runs it through the pipeline
async fn process_task(
    fetcher: &dyn Fetcher,
    pipeline: &Pipeline,
    task: &Task,
) -> Result<Vec<Task>, DeltaError> {
    let page = fetcher.fetch(&FetchRequest::for_task(task)).await?;
    pipeline.process(task, &page)
}

/// Runs one crawl pass end to end
///
/// This function:
///
/// 1. Opens (or creates) the database
/// 2. Builds the HTTP fetcher from the session settings
/// 3. Resumes or starts a run of the pass
/// 4. Installs a Ctrl-C handler that interrupts the run
/// 5. Runs the dispatch loop until the frontier drains
///
/// # Example
///
/// ```no_run
/// use delta_crawl::config::load_config_with_hash;
/// use delta_crawl::crawler::run_crawl;
/// use delta_crawl::CrawlPass;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (config, hash) = load_config_with_hash(Path::new("delta.toml"))?;
/// run_crawl(config, &hash, CrawlPass::Discovery).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(
    config: Config,
    config_hash: &str,
    pass: CrawlPass,
) -> Result<RunSummary, DeltaError> {
    let storage = shared(open_storage(Path::new(&config.storage.database_path))?);
    let fetcher = Arc::new(HttpFetcher::new(&config.session)?);

    let mut coordinator = Coordinator::new(Arc::new(config), config_hash, pass, storage, fetcher)?;

    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl-C, stopping after the current dispatch");
            shutdown.trigger();
        }
    });

    coordinator.run().await
}
