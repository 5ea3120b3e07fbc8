//! CLI entry point for the topic-model sweep.

use anyhow::{Result, anyhow};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use topic_sweep::{
    CancellationToken, Corpus, CorpusImporter, ExistingCorpusPolicy, RunStatus, Sweep,
    SweepConfig, SweepError, SweepReport,
};
use tracing::{error, info, warn};

/// Environment variable naming the MALLET launcher.
const ENGINE_ENV: &str = "TOPIC_SWEEP_ENGINE";

/// CLI-compatible existing-corpus policy enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliCorpusPolicy {
    /// Rebuild the corpus, replacing the old one on success
    Overwrite,
    /// Keep an existing corpus and skip the import
    Reuse,
    /// Abort if the corpus already exists
    Fail,
}

impl From<CliCorpusPolicy> for ExistingCorpusPolicy {
    fn from(cli: CliCorpusPolicy) -> Self {
        match cli {
            CliCorpusPolicy::Overwrite => ExistingCorpusPolicy::Overwrite,
            CliCorpusPolicy::Reuse => ExistingCorpusPolicy::Reuse,
            CliCorpusPolicy::Fail => ExistingCorpusPolicy::Fail,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Hyperparameter sweep for MALLET topic models",
    long_about = "Imports a directory of texts into a MALLET corpus, then trains one topic \
                  model per combination of topic count, iteration count and optimize \
                  interval. Runs whose output files are already complete are skipped.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  TOPIC_SWEEP_ENGINE    Path to the MALLET launcher (overridden by --engine)\n\n\
                  EXAMPLES:\n  \
                  # Sweep three topic counts\n  \
                  topic-sweep --text-dir texts --model-dir models --topics 50,100,250\n\n  \
                  # Preview the runs without launching anything\n  \
                  topic-sweep -c sweep.json --dry-run\n\n  \
                  # Reuse an existing corpus and run two models at a time\n  \
                  topic-sweep -c sweep.json --skip-import -j 2"
)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the MALLET launcher
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Directory of plain-text documents
    #[arg(long)]
    text_dir: Option<PathBuf>,

    /// Corpus container to write (or read with --skip-import)
    #[arg(long)]
    corpus_file: Option<PathBuf>,

    /// Directory receiving the model files
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Stopword list
    #[arg(long)]
    stoplist: Option<PathBuf>,

    /// Token-recognition pattern for the import
    #[arg(long)]
    token_pattern: Option<String>,

    /// Topic counts, comma separated
    #[arg(long, value_delimiter = ',')]
    topics: Option<Vec<u64>>,

    /// Iteration counts, comma separated
    #[arg(long, value_delimiter = ',')]
    iterations: Option<Vec<u64>>,

    /// Optimize intervals, comma separated
    #[arg(long, value_delimiter = ',')]
    intervals: Option<Vec<u64>>,

    /// Words listed per topic
    #[arg(long)]
    top_words: Option<u32>,

    /// Sampler threads per engine process
    #[arg(long)]
    threads: Option<u32>,

    /// Engine processes running at once
    #[arg(short = 'j', long)]
    parallelism: Option<usize>,

    /// Wall-clock limit per engine process, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Extra attempts for failed runs
    #[arg(long)]
    retries: Option<u32>,

    /// Also write the diagnostics XML of every run
    #[arg(long)]
    diagnostics: bool,

    /// What to do when the corpus container already exists
    #[arg(long, value_enum)]
    corpus_policy: Option<CliCorpusPolicy>,

    /// Use the existing corpus container instead of importing
    #[arg(long)]
    skip_import: bool,

    /// Print the corpus preview, grid and engine calls without running them
    #[arg(long)]
    dry_run: bool,

    /// Stop at the first run that does not succeed
    #[arg(long)]
    fail_fast: bool,

    /// Output JSON to stdout instead of human-readable summary
    ///
    /// Disables all progress logs; only outputs the final JSON report.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    dotenv().ok();

    let config = build_config(&args).map_err(|e| fatal(&args, e))?;

    let token = CancellationToken::new();
    #[cfg(feature = "signals")]
    install_interrupt_handler(token.clone());

    let sweep = build_sweep(&args, config, token.clone()).map_err(|e| fatal(&args, e))?;

    if args.dry_run {
        return run_dry_run(&sweep);
    }

    run_sweep(&sweep, &args, &token)
}

/// File config (if any), then environment, then flags.
fn build_config(args: &Args) -> topic_sweep::SweepResult<SweepConfig> {
    let base = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SweepConfig::from_json_file(path)?
        }
        None => SweepConfig::default(),
    };

    let mut builder = SweepConfig::builder().base(base);

    let engine = args
        .engine
        .clone()
        .or_else(|| std::env::var_os(ENGINE_ENV).map(PathBuf::from));
    if let Some(engine) = engine {
        builder = builder.engine_path(engine);
    }
    if let Some(ref dir) = args.text_dir {
        builder = builder.text_dir(dir);
    }
    if let Some(ref file) = args.corpus_file {
        builder = builder.corpus_file(file);
    }
    if let Some(ref dir) = args.model_dir {
        builder = builder.model_dir(dir);
    }
    if let Some(ref stoplist) = args.stoplist {
        builder = builder.stoplist(stoplist);
    }
    if let Some(ref pattern) = args.token_pattern {
        builder = builder.token_pattern(pattern);
    }
    if let Some(ref topics) = args.topics {
        builder = builder.num_topics(topics.clone());
    }
    if let Some(ref iterations) = args.iterations {
        builder = builder.num_iterations(iterations.clone());
    }
    if let Some(ref intervals) = args.intervals {
        builder = builder.optimize_intervals(intervals.clone());
    }
    if let Some(n) = args.top_words {
        builder = builder.num_top_words(n);
    }
    if let Some(n) = args.threads {
        builder = builder.num_threads(n);
    }
    if let Some(k) = args.parallelism {
        builder = builder.parallelism(k);
    }
    if let Some(secs) = args.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(n) = args.retries {
        builder = builder.retries(n);
    }
    if args.diagnostics {
        builder = builder.diagnostics(true);
    }
    if let Some(policy) = args.corpus_policy {
        builder = builder.corpus_policy(policy.into());
    }

    Ok(builder.build()?)
}

fn build_sweep(
    args: &Args,
    config: SweepConfig,
    token: CancellationToken,
) -> topic_sweep::SweepResult<Sweep> {
    let mut builder = Sweep::builder().config(config).cancellation_token(token);

    if args.dry_run {
        builder = builder.without_result_log();
    }

    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            info!(
                "[{:.0}%] {}: {}",
                update.progress * 100.0,
                update.stage.display_name(),
                update.message
            );
        });
    }

    builder.build()
}

/// Signals that stop the sweep: Ctrl-C everywhere, plus SIGTERM and SIGHUP
/// on unix.
#[cfg(feature = "signals")]
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

#[cfg(feature = "signals")]
impl ShutdownSignals {
    /// Install the handlers. Must run inside a runtime context.
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the first signal and return its name.
    #[cfg(unix)]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some("SIGINT"),
            Some(()) = self.terminate.recv() => Some("SIGTERM"),
            Some(()) = self.hangup.recv() => Some("SIGHUP"),
            else => None,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "Ctrl-C")
    }
}

/// Cancel the sweep on Ctrl-C, SIGTERM or SIGHUP. Engine processes run in
/// their own process group and are killed by the executor, not by the
/// terminal.
///
/// The handlers are installed before this returns, so a signal arriving once
/// the sweep has started always goes through the cancellation path.
#[cfg(feature = "signals")]
fn install_interrupt_handler(token: CancellationToken) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Could not install signal handlers: {}", e);
            return;
        }
    };
    let registered = {
        let _guard = runtime.enter();
        ShutdownSignals::register()
    };
    let mut signals = match registered {
        Ok(signals) => signals,
        Err(e) => {
            warn!("Could not install signal handlers: {}", e);
            return;
        }
    };

    std::thread::spawn(move || {
        runtime.block_on(async {
            if let Some(name) = signals.recv().await {
                warn!("{} received, stopping the sweep...", name);
                token.cancel();
            }
        });
    });
}

/// Log a fatal error (or print it as JSON) and turn it into the exit error.
fn fatal(args: &Args, e: SweepError) -> anyhow::Error {
    if args.json {
        match serde_json::to_string_pretty(&serde_json::json!({ "error": e })) {
            Ok(json) => println!("{json}"),
            Err(ser) => error!("Could not serialize error: {}", ser),
        }
    } else {
        error!("Sweep failed: {}", e);
    }
    anyhow!("{} ({})", e, e.error_code())
}

/// Show what the sweep would do without launching anything.
///
/// Note: This function uses `println!` intentionally for user-facing CLI output.
fn run_dry_run(sweep: &Sweep) -> Result<()> {
    let config = sweep.config();

    println!("\n{}", "=".repeat(80));
    println!("DRY RUN - Preview of the sweep");
    println!("{}\n", "=".repeat(80));

    println!("CORPUS");
    println!("{}", "-".repeat(40));
    println!("  Texts:     {}", config.text_dir.display());
    println!("  Stoplist:  {}", config.stoplist.display());
    println!("  Container: {}", config.corpus_file.display());
    match CorpusImporter::preview(&config.text_dir, &config.stoplist, sweep.token_rule()) {
        Ok(preview) => {
            println!("  Documents: {}", preview.documents);
            println!(
                "  Tokens:    {} kept, {} stopwords removed",
                preview.tokens, preview.stopwords_removed
            );
            println!("  Vocabulary: {}", preview.vocabulary);
            if !preview.empty_documents.is_empty() {
                println!(
                    "  ! {} documents have no tokens left after stopword removal",
                    preview.empty_documents.len()
                );
                for doc in preview.empty_documents.iter().take(5) {
                    println!("    - {}", doc.display());
                }
            }
        }
        Err(e) => println!("  ! Import would fail: {}", e),
    }
    println!();

    println!("GRID");
    println!("{}", "-".repeat(40));
    for dim in sweep.grid().dimensions() {
        let values: Vec<String> = dim.values.iter().map(ToString::to_string).collect();
        println!("  {:<20} {:<22} {}", dim.name, dim.flag, values.join(", "));
    }
    println!("  {} runs", sweep.grid().size());
    println!();

    println!("RUNS");
    println!("{}", "-".repeat(40));
    let plan = sweep.plan()?;
    for run in &plan {
        let marker = if run.already_complete {
            "skip (complete)"
        } else {
            "train"
        };
        println!("  {:<30} {}", run.identity, marker);
        println!("    {}", run.invocation);
    }
    println!();

    let to_train = plan.iter().filter(|r| !r.already_complete).count();
    println!("{}", "=".repeat(80));
    println!(
        "{} of {} runs would be trained. Run without --dry-run to start.",
        to_train,
        plan.len()
    );
    println!("{}", "=".repeat(80));

    Ok(())
}

fn run_sweep(sweep: &Sweep, args: &Args, token: &CancellationToken) -> Result<()> {
    let config = sweep.config();

    let corpus = if args.skip_import {
        info!("Using existing corpus {}", config.corpus_file.display());
        Corpus::open(&config.corpus_file)
    } else {
        sweep.import_corpus()
    }
    .map_err(|e| fatal(args, e))?;

    info!("{}", "=".repeat(80));
    info!("Starting sweep over {} grid points...", sweep.grid().size());
    info!("{}", "=".repeat(80));

    let mut results = Vec::new();
    for result in sweep.run(&corpus).map_err(|e| fatal(args, e))? {
        let failed = !result.status.is_success();
        results.push(result);
        if failed && args.fail_fast {
            warn!("Stopping after the first unsuccessful run (--fail-fast)");
            break;
        }
    }

    let report = SweepReport::new(results);
    let report_path = report
        .write_to_dir(&config.model_dir)
        .map_err(|e| fatal(args, e))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_readable_summary(&report, sweep);
        info!("Report written to: {}", report_path.display());
    }

    if token.is_cancelled() {
        return Err(anyhow!("Sweep cancelled"));
    }
    if report.summary.has_failures() {
        return Err(anyhow!(
            "{} of {} runs did not succeed",
            report.summary.unsuccessful(),
            report.summary.runs
        ));
    }
    Ok(())
}

/// Print a human-readable summary of the sweep results.
fn print_human_readable_summary(report: &SweepReport, sweep: &Sweep) {
    let summary = &report.summary;

    println!();
    println!("{}", "=".repeat(80));
    println!("SWEEP COMPLETE");
    println!("{}", "=".repeat(80));
    println!();

    println!(
        "{:<30} {:<12} {:>8} {:>12}",
        "Run", "Status", "Attempts", "Duration"
    );
    println!("{}", "-".repeat(66));
    for result in &report.results {
        println!(
            "{:<30} {:<12} {:>8} {:>11.1}s",
            result.identity.as_str(),
            result.status.label(),
            result.attempts,
            result.duration_ms as f64 / 1000.0
        );
        match &result.status {
            RunStatus::ProcessFailure { message, .. } => println!("    ! {}", message),
            RunStatus::IncompleteOutput { missing } => {
                for path in missing {
                    println!("    ! missing {}", path.display());
                }
            }
            RunStatus::CorruptOutput { reason } => println!("    ! {}", reason),
            _ => {}
        }
    }
    println!();

    println!("Summary:");
    println!("  Grid points:      {}", sweep.grid().size());
    println!("  Runs reported:    {}", summary.runs);
    println!("  Trained:          {}", summary.succeeded);
    println!("  Already complete: {}", summary.already_complete);
    println!("  Failed:           {}", summary.failed);
    println!("  Timed out:        {}", summary.timed_out);
    if summary.cancelled > 0 {
        println!("  Cancelled:        {}", summary.cancelled);
    }
    println!(
        "  Engine time:      {:.1}s",
        summary.duration_ms as f64 / 1000.0
    );
    println!();

    println!("Use --json for machine-readable output");
    println!("{}", "=".repeat(80));
}
