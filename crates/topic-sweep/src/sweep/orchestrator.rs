//! The sweep orchestrator.
//!
//! A [`Sweep`] walks the hyperparameter grid and trains one model per grid
//! point. Points whose artifact set already validates as complete are
//! skipped, so an interrupted sweep can simply be started again.

use crate::config::{FixedParams, SweepConfig};
use crate::corpus::{Corpus, CorpusImporter, TokenRule};
use crate::error::{Result, SweepError};
use crate::grid::{GridPoint, HyperparameterGrid};
use crate::identity::{RunArtifactSet, RunIdentity, derive_all};
use crate::invocation::{InvocationBuilder, ProcessInvocation};
use crate::process::{ProcessExecutor, ProcessOutcome, SystemExecutor};
use crate::report::{RESULT_LOG_FILE, ResultLog};
use crate::sweep::progress::{
    CancellationToken, ClosureProgressReporter, ProgressReporter, ProgressUpdate, SweepStage,
};
use crate::types::{RunResult, RunStatus};
use crate::validator::{ArtifactValidator, ValidationVerdict};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Orchestrates training runs over a hyperparameter grid.
///
/// Use [`Sweep::builder()`] to create one.
///
/// # Example
///
/// ```rust,ignore
/// use topic_sweep::{Sweep, SweepConfig};
///
/// let sweep = Sweep::builder()
///     .config(SweepConfig::builder().num_topics(vec![50, 100]).build()?)
///     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
///     .build()?;
///
/// let corpus = sweep.import_corpus()?;
/// for result in sweep.run(&corpus)? {
///     println!("{}: {}", result.identity, result.status.label());
/// }
/// ```
pub struct Sweep {
    config: SweepConfig,
    grid: HyperparameterGrid,
    fixed: FixedParams,
    token_rule: TokenRule,
    invocations: InvocationBuilder,
    executor: Arc<dyn ProcessExecutor>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: CancellationToken,
    result_log: Option<PathBuf>,
    available_cpus: usize,
}

static_assertions::assert_impl_all!(Sweep: Send, Sync);

/// A grid point as the sweep would handle it, without running anything.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub identity: RunIdentity,
    pub point: GridPoint,
    pub invocation: ProcessInvocation,
    /// A complete artifact set is already on disk; the run would be skipped.
    pub already_complete: bool,
}

impl Sweep {
    /// Create a new sweep builder.
    pub fn builder() -> SweepBuilder {
        SweepBuilder::default()
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn grid(&self) -> &HyperparameterGrid {
        &self.grid
    }

    pub fn token_rule(&self) -> &TokenRule {
        &self.token_rule
    }

    /// Importer configured from this sweep's settings.
    pub fn importer(&self) -> CorpusImporter {
        CorpusImporter::new(
            self.invocations.clone(),
            self.executor.clone(),
            &self.config.corpus_file,
        )
        .policy(self.config.corpus_policy)
        .cancellation_token(self.cancellation_token.clone())
    }

    /// Build the corpus from the configured text directory and stoplist.
    pub fn import_corpus(&self) -> Result<Corpus> {
        self.report_progress(ProgressUpdate::new(
            SweepStage::Importing,
            format!("Importing {}", self.config.text_dir.display()),
        ));

        let result = self.importer().import(
            &self.config.text_dir,
            &self.config.stoplist,
            &self.token_rule,
        );
        if let Err(e) = &result {
            self.report_failure(e);
        }
        result
    }

    /// Every grid point with its identity and training invocation, in visiting
    /// order. Nothing is launched and the corpus does not need to exist.
    pub fn plan(&self) -> Result<Vec<PlannedRun>> {
        let corpus = Corpus::at(&self.config.corpus_file);
        derive_all(&self.grid)?
            .into_iter()
            .map(|(point, identity)| {
                let invocation = self
                    .invocations
                    .train(&corpus, &identity, &point, &self.fixed)?;
                let already_complete =
                    ArtifactValidator::validate(&self.fixed.artifact_set(&identity, &point))
                        .is_complete();
                Ok(PlannedRun {
                    identity,
                    point,
                    invocation,
                    already_complete,
                })
            })
            .collect()
    }

    /// Start the sweep over `corpus`.
    ///
    /// All fatal preconditions are checked here, before any engine process
    /// starts. The returned iterator then trains lazily: each call to `next`
    /// finishes at least one grid point, and dropping it stops the sweep once
    /// the runs already started have finished.
    ///
    /// # Errors
    ///
    /// - [`SweepError::InvalidInput`] if the corpus container is missing.
    /// - [`SweepError::AmbiguousIdentity`] if two points share an identity.
    /// - [`SweepError::ResourceOvercommit`] if parallel runs would need more
    ///   CPUs than the host has.
    /// - [`SweepError::Cancelled`] if cancellation was already requested.
    pub fn run(&self, corpus: &Corpus) -> Result<SweepRun<'_>> {
        match self.prepare(corpus) {
            Ok(run) => Ok(run),
            Err(e) => {
                self.report_failure(&e);
                error!("Sweep error: {}", e);
                Err(e)
            }
        }
    }

    fn prepare(&self, corpus: &Corpus) -> Result<SweepRun<'_>> {
        self.report_progress(ProgressUpdate::new(
            SweepStage::Initializing,
            format!("Planning {} runs", self.grid.size()),
        ));

        corpus.verify()?;
        self.check_cancelled()?;
        let plan = derive_all(&self.grid)?;
        self.check_resources()?;

        std::fs::create_dir_all(&self.fixed.output_dir)?;
        let result_log = self.result_log.as_ref().map(ResultLog::open).transpose()?;

        info!(
            "Sweeping {} grid points over {} (parallelism {})",
            plan.len(),
            corpus.path().display(),
            self.config.parallelism
        );

        let trainer = Arc::new(Trainer {
            corpus: corpus.clone(),
            fixed: self.fixed.clone(),
            invocations: self.invocations.clone(),
            executor: Arc::clone(&self.executor),
            cancellation_token: self.cancellation_token.clone(),
            retries: self.config.retries,
            timeout: self.config.timeout(),
        });
        let pool = if self.config.parallelism > 1 {
            let size = self.config.parallelism.min(plan.len()).max(1);
            Some(WorkerPool::spawn(size, &trainer)?)
        } else {
            None
        };

        Ok(SweepRun {
            sweep: self,
            trainer,
            pool,
            total: plan.len(),
            plan: plan.into_iter().collect(),
            next_planned: 0,
            next_yield: 0,
            ready: BTreeMap::new(),
            in_flight: 0,
            result_log,
            finished: 0,
            failures: 0,
            stopped: false,
            reported_end: false,
        })
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(SweepError::Cancelled);
        }
        Ok(())
    }

    fn check_resources(&self) -> Result<()> {
        let parallelism = self.config.parallelism;
        let threads_per_run = self.config.num_threads as usize;
        let demand = parallelism.saturating_mul(threads_per_run);
        if demand <= self.available_cpus {
            return Ok(());
        }
        if parallelism > 1 {
            return Err(SweepError::ResourceOvercommit {
                parallelism,
                threads_per_run,
                available_cpus: self.available_cpus,
            });
        }
        warn!(
            "Engine uses {} threads but only {} CPUs are available",
            threads_per_run, self.available_cpus
        );
        Ok(())
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if let Some(reporter) = &self.progress_reporter {
            reporter.report(update);
        }
    }

    fn report_failure(&self, e: &SweepError) {
        if e.is_cancelled() {
            self.report_progress(ProgressUpdate::cancelled());
        } else {
            self.report_progress(ProgressUpdate::failed(e.to_string()));
        }
    }

}

/// Trains single grid points.
///
/// Holds its own copy of the sweep's settings so that pool workers can share
/// it.
struct Trainer {
    corpus: Corpus,
    fixed: FixedParams,
    invocations: InvocationBuilder,
    executor: Arc<dyn ProcessExecutor>,
    cancellation_token: CancellationToken,
    retries: u32,
    timeout: Option<Duration>,
}

impl Trainer {
    /// Train one grid point, retrying retryable failures.
    fn execute_point(&self, point: &GridPoint, identity: &RunIdentity) -> RunResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let artifacts = self.fixed.artifact_set(identity, point);

        let mut attempts = 0;
        let mut exit_code = None;
        let status = loop {
            if self.cancellation_token.is_cancelled() {
                break RunStatus::Cancelled;
            }
            attempts += 1;
            let (status, code) = self.attempt(point, identity, &artifacts);
            exit_code = code;
            if status.is_retryable() && attempts <= self.retries {
                warn!(
                    "Run {} attempt {} ended {}, retrying",
                    identity,
                    attempts,
                    status.label()
                );
                continue;
            }
            break status;
        };

        RunResult {
            identity: identity.clone(),
            point: point.clone(),
            status,
            exit_code,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
            started_at,
        }
    }

    fn attempt(
        &self,
        point: &GridPoint,
        identity: &RunIdentity,
        artifacts: &RunArtifactSet,
    ) -> (RunStatus, Option<i32>) {
        if let Err(e) = artifacts.remove_all() {
            return (
                RunStatus::ProcessFailure {
                    exit_code: None,
                    message: format!("cannot clear stale artifacts: {e}"),
                },
                None,
            );
        }

        let invocation = match self.invocations.train(&self.corpus, identity, point, &self.fixed) {
            Ok(inv) => inv,
            Err(e) => {
                return (
                    RunStatus::ProcessFailure {
                        exit_code: None,
                        message: e.to_string(),
                    },
                    None,
                );
            }
        };
        debug!("{}", invocation);

        let execution = match self.executor.execute(
            &invocation,
            self.timeout,
            &self.cancellation_token,
        ) {
            Ok(execution) => execution,
            Err(e) => {
                return (
                    RunStatus::ProcessFailure {
                        exit_code: None,
                        message: format!(
                            "cannot launch {}: {e}",
                            invocation.program().display()
                        ),
                    },
                    None,
                );
            }
        };

        match execution.outcome {
            ProcessOutcome::Exited { code: Some(0) } => {
                let status = match ArtifactValidator::validate(artifacts) {
                    ValidationVerdict::Complete => RunStatus::Success,
                    ValidationVerdict::Incomplete { missing } => {
                        RunStatus::IncompleteOutput { missing }
                    }
                    ValidationVerdict::Corrupt { reason } => RunStatus::CorruptOutput { reason },
                };
                (status, Some(0))
            }
            ProcessOutcome::Exited { code } => {
                discard(artifacts);
                let message = match code {
                    Some(c) => format!("engine exited with status {c}"),
                    None => "engine was terminated by a signal".to_string(),
                };
                (
                    RunStatus::ProcessFailure {
                        exit_code: code,
                        message,
                    },
                    code,
                )
            }
            ProcessOutcome::TimedOut => {
                discard(artifacts);
                (
                    RunStatus::Timeout {
                        limit_secs: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                    },
                    None,
                )
            }
            ProcessOutcome::Cancelled => {
                discard(artifacts);
                (RunStatus::Cancelled, None)
            }
        }
    }
}

/// Partial output of a failed or killed run must not survive it.
fn discard(artifacts: &RunArtifactSet) {
    if let Err(e) = artifacts.remove_all() {
        warn!(
            "Failed to remove partial artifacts of {}: {}",
            artifacts.identity, e
        );
    }
}

fn already_complete(point: GridPoint, identity: RunIdentity) -> RunResult {
    RunResult {
        identity,
        point,
        status: RunStatus::AlreadyComplete,
        exit_code: None,
        duration_ms: 0,
        attempts: 0,
        started_at: Utc::now(),
    }
}

/// Result for a point whose worker never reported back.
fn lost(point: GridPoint, identity: RunIdentity, message: &str) -> RunResult {
    RunResult {
        identity,
        point,
        status: RunStatus::ProcessFailure {
            exit_code: None,
            message: message.to_string(),
        },
        exit_code: None,
        duration_ms: 0,
        attempts: 1,
        started_at: Utc::now(),
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// A grid point handed to a worker, tagged with its position in the plan.
struct Job {
    index: usize,
    point: GridPoint,
    identity: RunIdentity,
}

/// Fixed set of threads training jobs from a shared queue.
struct WorkerPool {
    jobs: Option<mpsc::Sender<Job>>,
    results: mpsc::Receiver<(usize, RunResult)>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    fn spawn(size: usize, trainer: &Arc<Trainer>) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (result_tx, result_rx) = mpsc::channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let trainer = Arc::clone(trainer);
            let handle = thread::Builder::new()
                .name(format!("sweep-worker-{i}"))
                .spawn(move || work(&trainer, &jobs, &results))?;
            workers.push(handle);
        }
        debug!("Started {} sweep workers", workers.len());

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
        })
    }

    /// Queue a job. Gives the job back if every worker is gone.
    fn submit(&self, job: Job) -> std::result::Result<(), Job> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    /// Stop accepting jobs. Idle workers exit; busy ones finish first.
    fn close(&mut self) {
        self.jobs.take();
    }

    fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Sweep worker thread panicked");
            }
        }
    }
}

fn work(
    trainer: &Trainer,
    jobs: &Mutex<mpsc::Receiver<Job>>,
    results: &mpsc::Sender<(usize, RunResult)>,
) {
    loop {
        let next = jobs.lock().recv();
        let Ok(job) = next else {
            return;
        };

        info!("Training {}", job.identity);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            trainer.execute_point(&job.point, &job.identity)
        }))
        .unwrap_or_else(|_| {
            error!("Worker for {} panicked", job.identity);
            lost(job.point.clone(), job.identity.clone(), "sweep worker panicked")
        });

        if results.send((job.index, result)).is_err() {
            return;
        }
    }
}

// ============================================================================
// Sweep Iterator
// ============================================================================

/// An in-progress sweep, yielding one [`RunResult`] per grid point.
///
/// Results are yielded in grid order. With parallelism `K > 1` a pool of
/// worker threads keeps up to `K` engine processes busy, and results that
/// finish ahead of their turn wait in a buffer. Once cancellation is
/// observed no new run starts; the iterator yields what finished and then
/// ends.
///
/// Dropping the iterator early waits for the runs already started and
/// appends their results to the result log.
pub struct SweepRun<'a> {
    sweep: &'a Sweep,
    trainer: Arc<Trainer>,
    pool: Option<WorkerPool>,
    plan: VecDeque<(GridPoint, RunIdentity)>,
    /// Plan position of the next point taken from `plan`.
    next_planned: usize,
    /// Plan position of the next result to yield.
    next_yield: usize,
    ready: BTreeMap<usize, RunResult>,
    in_flight: usize,
    result_log: Option<ResultLog>,
    total: usize,
    finished: usize,
    failures: usize,
    stopped: bool,
    reported_end: bool,
}

impl SweepRun<'_> {
    /// Number of grid points in the sweep.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of results yielded so far.
    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Start runs: with a pool until `K` are in flight, otherwise inline
    /// until the next result to yield exists. Complete points are skipped
    /// without launching anything.
    fn dispatch(&mut self) {
        let limit = self.sweep.config.parallelism.max(1);

        while !self.stopped {
            let saturated = match self.pool {
                Some(_) => self.in_flight >= limit,
                None => self.ready.contains_key(&self.next_yield),
            };
            if saturated {
                break;
            }
            let Some((point, identity)) = self.plan.pop_front() else {
                break;
            };
            let index = self.next_planned;
            self.next_planned += 1;

            let artifacts = self.trainer.fixed.artifact_set(&identity, &point);
            if ArtifactValidator::validate(&artifacts).is_complete() {
                debug!("Run {} already complete, skipping", identity);
                self.ready.insert(index, already_complete(point, identity));
                continue;
            }

            match &self.pool {
                Some(pool) => {
                    let job = Job {
                        index,
                        point,
                        identity,
                    };
                    match pool.submit(job) {
                        Ok(()) => self.in_flight += 1,
                        Err(job) => {
                            error!("No sweep worker left to train {}", job.identity);
                            let result = lost(job.point, job.identity, "no sweep worker left");
                            self.ready.insert(index, result);
                            self.stopped = true;
                        }
                    }
                }
                None => {
                    info!("Training {}", identity);
                    let result = self.trainer.execute_point(&point, &identity);
                    self.ready.insert(index, result);
                }
            }
        }
    }

    /// Block until a worker reports a finished run.
    fn collect(&mut self) {
        let Some(pool) = &self.pool else {
            self.in_flight = 0;
            return;
        };
        match pool.results.recv() {
            Ok((index, result)) => {
                self.in_flight -= 1;
                self.ready.insert(index, result);
            }
            Err(_) => {
                error!("Sweep workers exited with {} runs in flight", self.in_flight);
                self.in_flight = 0;
                self.stopped = true;
            }
        }
    }

    fn append_to_log(&self, result: &RunResult) {
        if let Some(log) = &self.result_log {
            if let Err(e) = log.append(result) {
                warn!("Failed to append to {}: {}", log.path().display(), e);
            }
        }
    }

    fn record(&mut self, result: &RunResult) {
        self.finished += 1;
        if !result.status.is_success() {
            self.failures += 1;
        }

        self.append_to_log(result);

        match &result.status {
            RunStatus::Success | RunStatus::AlreadyComplete => {
                info!("Run {}: {}", result.identity, result.status.label())
            }
            other => warn!("Run {}: {} ({:?})", result.identity, other.label(), other),
        }

        self.sweep.report_progress(ProgressUpdate::with_run(
            result.identity.as_str(),
            self.finished,
            self.total,
            format!("{}: {}", result.identity, result.status.label()),
        ));
    }

    fn report_end(&mut self) {
        if self.reported_end {
            return;
        }
        self.reported_end = true;

        if self.sweep.cancellation_token.is_cancelled() {
            info!("Sweep cancelled after {} of {} runs", self.finished, self.total);
            self.sweep.report_progress(ProgressUpdate::cancelled());
        } else {
            info!(
                "Sweep finished: {} runs, {} not successful",
                self.finished, self.failures
            );
            self.sweep.report_progress(ProgressUpdate::complete(format!(
                "{} of {} runs successful",
                self.finished - self.failures,
                self.total
            )));
        }
    }
}

impl Iterator for SweepRun<'_> {
    type Item = RunResult;

    fn next(&mut self) -> Option<RunResult> {
        loop {
            if let Some(result) = self.ready.remove(&self.next_yield) {
                self.next_yield += 1;
                self.record(&result);
                if matches!(result.status, RunStatus::Cancelled) {
                    self.stopped = true;
                }
                return Some(result);
            }

            if self.sweep.cancellation_token.is_cancelled() {
                self.stopped = true;
            }
            self.dispatch();
            if self.ready.contains_key(&self.next_yield) {
                continue;
            }
            if self.in_flight == 0 {
                self.stopped = true;
                self.report_end();
                return None;
            }
            self.collect();
        }
    }
}

impl Drop for SweepRun<'_> {
    fn drop(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            pool.close();
            while self.in_flight > 0 {
                match pool.results.recv() {
                    Ok((index, result)) => {
                        self.in_flight -= 1;
                        self.ready.insert(index, result);
                    }
                    Err(_) => break,
                }
            }
            pool.join();
        }
        for result in std::mem::take(&mut self.ready).into_values() {
            self.append_to_log(&result);
        }
    }
}

/// Builder for [`Sweep`].
#[derive(Default)]
pub struct SweepBuilder {
    config: Option<SweepConfig>,
    grid: Option<HyperparameterGrid>,
    executor: Option<Arc<dyn ProcessExecutor>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
    cancellation_token: Option<CancellationToken>,
    result_log: Option<Option<PathBuf>>,
    available_cpus: Option<usize>,
}

static_assertions::assert_impl_all!(SweepBuilder: Send);

impl SweepBuilder {
    /// Set the sweep configuration.
    pub fn config(mut self, config: SweepConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom grid instead of the three axes of the configuration.
    ///
    /// Each dimension's flag and suffix drive invocations and identities.
    pub fn grid(mut self, grid: HyperparameterGrid) -> Self {
        self.grid = Some(grid);
        self
    }

    /// Set the process executor. Defaults to [`SystemExecutor`].
    pub fn executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set a progress reporter for receiving updates during the sweep.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Set a cancellation token for stopping the sweep.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Append results to `path` instead of `<model_dir>/sweep-results.jsonl`.
    pub fn result_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_log = Some(Some(path.into()));
        self
    }

    /// Do not write a result log.
    pub fn without_result_log(mut self) -> Self {
        self.result_log = Some(None);
        self
    }

    /// Override the detected CPU count used by the resource check.
    pub fn available_cpus(mut self, cpus: usize) -> Self {
        self.available_cpus = Some(cpus);
        self
    }

    /// Build the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::InvalidConfig`] if the configuration or the token
    /// pattern is invalid.
    pub fn build(self) -> Result<Sweep> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let grid = match self.grid {
            Some(grid) => grid,
            None => config.grid()?,
        };
        let token_rule = TokenRule::new(&config.token_pattern)?;
        let invocations =
            InvocationBuilder::new(&config.engine_path).with_dimensions(grid.dimensions());
        let result_log = self
            .result_log
            .unwrap_or_else(|| Some(config.model_dir.join(RESULT_LOG_FILE)));
        let available_cpus = self.available_cpus.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        Ok(Sweep {
            fixed: config.fixed_params(),
            config,
            grid,
            token_rule,
            invocations,
            executor: self
                .executor
                .unwrap_or_else(|| Arc::new(SystemExecutor::new())),
            progress_reporter: self.progress_reporter,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
            result_log,
            available_cpus,
        })
    }
}
