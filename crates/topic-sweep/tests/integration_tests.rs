//! Integration tests for the sweep orchestrator.
//!
//! These tests drive real processes: a small shell script stands in for the
//! MALLET launcher. It understands `import-dir` and `train-topics`, writes
//! every requested output file and records its invocations next to them.
//! A run with 13 topics crashes, and a run with 99 topics records its pid
//! and sleeps.

#![cfg(unix)]

use parking_lot::Mutex;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use topic_sweep::{
    ArtifactValidator, CancellationToken, Corpus, Dimension, HyperparameterGrid, ParamValue,
    ResultLog, RunResult, RunStatus, Sweep, SweepConfig, SweepStage, SweepSummary,
    ValidationVerdict,
};

// ============================================================================
// Helper Functions
// ============================================================================

const FAKE_ENGINE: &str = r#"#!/bin/sh
mode="$1"
shift
topics=1
out=""
keys=""
while [ $# -gt 0 ]; do
    case "$1" in
        --output) out="$2"; shift ;;
        --num-topics) topics="$2"; shift ;;
        --output-topic-keys) keys="$2"; shift ;;
        --word-topic-counts-file|--topic-word-weights-file|--output-doc-topics|--output-state|--diagnostics-file)
            echo "data" > "$2"; shift ;;
    esac
    shift
done

if [ "$mode" = "import-dir" ]; then
    echo "import-dir" >> "$(dirname "$out")/calls.txt"
    printf 'corpus' > "$out"
    exit 0
fi

echo "train-topics $topics" >> "$(dirname "$keys")/calls.txt"
if [ "$topics" = "13" ]; then
    echo "simulated crash" >&2
    exit 3
fi
if [ "$topics" = "99" ]; then
    echo "$$" > "$(dirname "$keys")/engine.pid"
    exec sleep 30
fi
: > "$keys"
i=0
while [ "$i" -lt "$topics" ]; do
    printf '%s\t0.05\tcrime police enquête\n' "$i" >> "$keys"
    i=$((i + 1))
done
"#;

/// Path of the fake engine, written once per test process so that no test
/// spawns a process while another one still holds the script open.
fn fake_engine() -> &'static Path {
    static ENGINE: OnceLock<(tempfile::TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = ENGINE.get_or_init(|| {
        let dir = tempfile::tempdir().expect("Failed to create engine dir");
        let path = dir.path().join("mallet");
        fs::write(&path, FAKE_ENGINE).expect("Failed to write fake engine");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake engine executable");
        (dir, path)
    });
    path
}

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create workspace");
        let texts = dir.path().join("texts");
        fs::create_dir(&texts).unwrap();
        fs::write(
            texts.join("rf0001.txt"),
            "Le commissaire Maigret arrive aujourd'hui à Paris.",
        )
        .unwrap();
        fs::write(texts.join("rf0002.txt"), "La police enquête sur le crime.").unwrap();
        fs::write(dir.path().join("stoplist.txt"), "le\nla\nsur\n").unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn model_dir(&self) -> PathBuf {
        self.path("model")
    }

    fn config(&self, topics: Vec<u64>) -> SweepConfig {
        SweepConfig::builder()
            .engine_path(fake_engine())
            .text_dir(self.path("texts"))
            .stoplist(self.path("stoplist.txt"))
            .corpus_file(self.model_dir().join("corpus.mallet"))
            .model_dir(self.model_dir())
            .num_topics(topics)
            .num_iterations(vec![100])
            .optimize_intervals(vec![10])
            .num_threads(1)
            .build()
            .unwrap()
    }

    fn sweep(&self, config: SweepConfig) -> Sweep {
        Sweep::builder()
            .config(config)
            .available_cpus(8)
            .build()
            .unwrap()
    }

    /// Engine invocations recorded so far, e.g. `["import-dir", "train-topics 10"]`.
    fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.model_dir().join("calls.txt"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn train_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("train-topics"))
            .count()
    }
}

fn run_all(sweep: &Sweep) -> Vec<RunResult> {
    let corpus = sweep.import_corpus().expect("import should succeed");
    sweep.run(&corpus).expect("sweep should start").collect()
}

// ============================================================================
// End-to-end Sweeps
// ============================================================================

#[test]
fn test_two_points_write_disjoint_artifact_sets() {
    let ws = Workspace::new();
    let config = ws.config(vec![10, 20]);
    let fixed = config.fixed_params();
    let sweep = ws.sweep(config);

    let results = run_all(&sweep);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == RunStatus::Success));
    assert_eq!(results[0].identity.as_str(), "10tp-100it-10in");
    assert_eq!(results[1].identity.as_str(), "20tp-100it-10in");

    let mut all_paths = Vec::new();
    for result in &results {
        let set = fixed.artifact_set(&result.identity, &result.point);
        assert_eq!(set.len(), 5);
        assert_eq!(ArtifactValidator::validate(&set), ValidationVerdict::Complete);
        all_paths.extend(set.paths().map(Path::to_path_buf));
    }
    all_paths.sort();
    all_paths.dedup();
    assert_eq!(all_paths.len(), 10);

    assert_eq!(ws.calls(), vec!["import-dir", "train-topics 10", "train-topics 20"]);
    assert!(ws.model_dir().join("logs/10tp-100it-10in.log").exists());
    assert!(ws.model_dir().join("logs/import.log").exists());
}

#[test]
fn test_rerun_launches_nothing() {
    let ws = Workspace::new();
    let sweep = ws.sweep(ws.config(vec![10, 20]));

    run_all(&sweep);
    assert_eq!(ws.train_calls(), 2);

    let corpus = Corpus::open(ws.model_dir().join("corpus.mallet")).unwrap();
    let rerun: Vec<RunResult> = sweep.run(&corpus).unwrap().collect();

    assert_eq!(rerun.len(), 2);
    assert!(rerun.iter().all(|r| r.status == RunStatus::AlreadyComplete));
    assert_eq!(ws.train_calls(), 2);
}

#[test]
fn test_failed_point_does_not_stop_sweep() {
    let ws = Workspace::new();
    let config = ws.config(vec![10, 13, 20]);
    let fixed = config.fixed_params();
    let sweep = ws.sweep(config);

    let results = run_all(&sweep);

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, RunStatus::Success);
    assert!(matches!(
        results[1].status,
        RunStatus::ProcessFailure {
            exit_code: Some(3),
            ..
        }
    ));
    assert_eq!(results[2].status, RunStatus::Success);

    // the crashed run left no partial files behind
    let failed = fixed.artifact_set(&results[1].identity, &results[1].point);
    assert!(failed.paths().all(|p| !p.exists()));

    let summary = SweepSummary::from_results(&results);
    assert_eq!(summary.failed, 1);
    assert!(summary.has_failures());
}

#[test]
fn test_result_log_records_every_run() {
    let ws = Workspace::new();
    let sweep = ws.sweep(ws.config(vec![10, 13]));
    run_all(&sweep);

    let logged = ResultLog::read(ws.model_dir().join("sweep-results.jsonl")).unwrap();
    assert_eq!(logged.len(), 2);
    assert_eq!(logged[1].status.label(), "failed");
}

#[test]
fn test_parallel_sweep_runs_every_point() {
    let ws = Workspace::new();
    let mut config = ws.config(vec![10, 20, 30, 40]);
    config.parallelism = 2;
    let sweep = Sweep::builder()
        .config(config)
        .available_cpus(4)
        .build()
        .unwrap();

    let results = run_all(&sweep);

    let topics: Vec<Option<u64>> = results.iter().map(|r| r.point.topics()).collect();
    assert_eq!(topics, vec![Some(10), Some(20), Some(30), Some(40)]);
    assert!(results.iter().all(|r| r.status == RunStatus::Success));
    assert_eq!(ws.train_calls(), 4);
}

// ============================================================================
// Preconditions
// ============================================================================

#[test]
fn test_empty_text_dir_launches_nothing() {
    let ws = Workspace::new();
    let empty = ws.path("empty");
    fs::create_dir(&empty).unwrap();
    let config = SweepConfig::builder()
        .base(ws.config(vec![10]))
        .text_dir(&empty)
        .build()
        .unwrap();
    let sweep = ws.sweep(config);

    let err = sweep.import_corpus().unwrap_err();

    assert_eq!(err.error_code(), "INVALID_INPUT");
    assert!(ws.calls().is_empty());
    assert!(!ws.model_dir().join("corpus.mallet").exists());
}

#[test]
fn test_missing_corpus_is_invalid_input() {
    let ws = Workspace::new();
    let err = Corpus::open(ws.model_dir().join("corpus.mallet")).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");
}

#[test]
fn test_overcommit_rejected_before_launch() {
    let ws = Workspace::new();
    let mut config = ws.config(vec![10, 20]);
    config.parallelism = 4;
    config.num_threads = 4;
    let sweep = Sweep::builder()
        .config(config)
        .available_cpus(8)
        .build()
        .unwrap();

    let corpus = sweep.import_corpus().unwrap();
    let err = sweep.run(&corpus).err().expect("overcommit should be fatal");

    assert_eq!(err.error_code(), "RESOURCE_OVERCOMMIT");
    assert_eq!(ws.train_calls(), 0);
}

#[test]
fn test_ambiguous_identities_rejected_before_launch() {
    let ws = Workspace::new();
    let text = |values: &[&str]| values.iter().map(|v| ParamValue::from(*v)).collect();
    let grid = HyperparameterGrid::new(vec![
        Dimension::new("a", "--a", "", text(&["1", "1-2"])),
        Dimension::new("b", "--b", "", text(&["2-3", "3"])),
    ])
    .unwrap();
    let sweep = Sweep::builder()
        .config(ws.config(vec![10]))
        .grid(grid)
        .available_cpus(8)
        .build()
        .unwrap();

    let corpus = sweep.import_corpus().unwrap();
    let err = sweep.run(&corpus).err().expect("collision should be fatal");

    assert_eq!(err.error_code(), "AMBIGUOUS_IDENTITY");
    assert!(err.to_string().contains("1-2-3"));
    assert_eq!(ws.train_calls(), 0);
}

// ============================================================================
// Timeouts and Cancellation
// ============================================================================

#[test]
fn test_timeout_kills_run_and_leaves_it_incomplete() {
    let ws = Workspace::new();
    let config = SweepConfig::builder()
        .base(ws.config(vec![99]))
        .timeout_secs(1)
        .build()
        .unwrap();
    let fixed = config.fixed_params();
    let sweep = ws.sweep(config);

    let start = Instant::now();
    let results = run_all(&sweep);

    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(results[0].status, RunStatus::Timeout { limit_secs: 1 });
    let set = fixed.artifact_set(&results[0].identity, &results[0].point);
    assert!(matches!(
        ArtifactValidator::validate(&set),
        ValidationVerdict::Incomplete { .. }
    ));
}

#[test]
fn test_cancellation_stops_sweep() {
    let ws = Workspace::new();
    let token = CancellationToken::new();
    let stages = Arc::new(Mutex::new(Vec::new()));
    let stages_clone = stages.clone();
    let config = ws.config(vec![99, 10]);
    let fixed = config.fixed_params();
    let sweep = Sweep::builder()
        .config(config)
        .cancellation_token(token.clone())
        .on_progress(move |update| stages_clone.lock().push(update.stage))
        .available_cpus(8)
        .build()
        .unwrap();
    let corpus = sweep.import_corpus().unwrap();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        token.cancel();
    });
    let start = Instant::now();
    let results: Vec<RunResult> = sweep.run(&corpus).unwrap().collect();
    canceller.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(8));
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, RunStatus::Cancelled);
    assert!(!ws.calls().contains(&"train-topics 10".to_string()));

    let set = fixed.artifact_set(&results[0].identity, &results[0].point);
    assert!(matches!(
        ArtifactValidator::validate(&set),
        ValidationVerdict::Incomplete { .. }
    ));
    assert_eq!(stages.lock().last(), Some(&SweepStage::Cancelled));
}

#[test]
fn test_cancelled_token_fails_fast() {
    let ws = Workspace::new();
    let token = CancellationToken::new();
    let sweep = Sweep::builder()
        .config(ws.config(vec![10]))
        .cancellation_token(token.clone())
        .available_cpus(8)
        .build()
        .unwrap();
    let corpus = sweep.import_corpus().unwrap();

    token.cancel();
    let err = sweep.run(&corpus).err().expect("cancelled sweep should not start");
    assert!(err.is_cancelled());
    assert_eq!(ws.train_calls(), 0);
}

// ============================================================================
// Command-line Binary
// ============================================================================

#[cfg(feature = "signals")]
mod cli {
    use super::*;
    use std::process::{Child, Command, ExitStatus, Stdio};
    use topic_sweep::derive_all;

    /// Poll `check` until it holds or `limit` expires.
    fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        check()
    }

    /// Wait for `child` to exit, killing it if it outlives `limit`.
    fn wait_for_exit(child: &mut Child, limit: Duration) -> Option<ExitStatus> {
        let mut status = None;
        wait_until(limit, || {
            status = child.try_wait().ok().flatten();
            status.is_some()
        });
        if status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
        }
        status
    }

    fn process_group_alive(pgid: i32) -> bool {
        // SAFETY: signal 0 performs only the existence and permission checks.
        unsafe { libc::kill(-pgid, 0) == 0 }
    }

    fn send_signal(pid: u32, signal: i32) {
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        assert_eq!(rc, 0, "Failed to signal {pid}");
    }

    fn spawn_cli(ws: &Workspace, topics: &str) -> Child {
        Command::new(env!("CARGO_BIN_EXE_topic-sweep"))
            .arg("--engine")
            .arg(fake_engine())
            .arg("--text-dir")
            .arg(ws.path("texts"))
            .arg("--stoplist")
            .arg(ws.path("stoplist.txt"))
            .arg("--model-dir")
            .arg(ws.model_dir())
            .arg("--corpus-file")
            .arg(ws.model_dir().join("corpus.mallet"))
            .args(["--topics", topics, "--iterations", "100", "--intervals", "10"])
            .args(["--threads", "1", "--quiet"])
            .env_remove("TOPIC_SWEEP_ENGINE")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to start topic-sweep")
    }

    fn assert_stopped_by(signal: i32) {
        let ws = Workspace::new();
        let pid_file = ws.model_dir().join("engine.pid");
        let mut cli = spawn_cli(&ws, "99,10");

        let engine_pgid = wait_until(Duration::from_secs(15), || {
            fs::read_to_string(&pid_file).is_ok_and(|s| s.trim().parse::<i32>().is_ok())
        })
        .then(|| fs::read_to_string(&pid_file).unwrap().trim().parse::<i32>().unwrap());
        let Some(engine_pgid) = engine_pgid else {
            let _ = cli.kill();
            let _ = cli.wait();
            panic!("engine never started");
        };
        assert!(process_group_alive(engine_pgid));

        send_signal(cli.id(), signal);
        let status = wait_for_exit(&mut cli, Duration::from_secs(10)).expect("topic-sweep hung");

        // exited through the cancellation path rather than the default handler
        assert_eq!(status.code(), Some(1));
        assert!(wait_until(Duration::from_secs(2), || !process_group_alive(engine_pgid)));
        assert!(!ws.calls().contains(&"train-topics 10".to_string()));

        let config = ws.config(vec![99]);
        let (point, identity) = derive_all(&config.grid().unwrap()).unwrap().remove(0);
        let set = config.fixed_params().artifact_set(&identity, &point);
        assert!(matches!(
            ArtifactValidator::validate(&set),
            ValidationVerdict::Incomplete { .. }
        ));

        let logged = ResultLog::read(ws.model_dir().join("sweep-results.jsonl")).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, RunStatus::Cancelled);
    }

    #[test]
    fn test_sigterm_kills_engine_group_and_leaves_run_incomplete() {
        assert_stopped_by(libc::SIGTERM);
    }

    #[test]
    fn test_sighup_kills_engine_group() {
        assert_stopped_by(libc::SIGHUP);
    }

    #[test]
    fn test_sigint_kills_engine_group() {
        assert_stopped_by(libc::SIGINT);
    }
}
