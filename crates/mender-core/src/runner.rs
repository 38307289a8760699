//! Test suite execution.
//!
//! [`ProcessRunner`] spawns the test tool, drains stdout and stderr on
//! dedicated tasks while the child runs, echoes every line to a [`LineSink`]
//! and keeps the full text for failure extraction.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MenderConfig;
use crate::error::{MenderError, Result};

/// Exit status and combined console output of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Exit code (-1 when the child was terminated by a signal).
    pub exit_code: i32,

    /// Combined stdout and stderr, one line per output line.
    pub raw_output: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl RunResult {
    /// Result with zero duration, for callers that did not time the run.
    pub fn new(exit_code: i32, raw_output: impl Into<String>) -> Self {
        Self {
            exit_code,
            raw_output: raw_output.into(),
            duration_ms: 0,
        }
    }

    /// Whether the run exited with code 0.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Observation channel for live runner output.
pub trait LineSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Echoes runner output to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn line(&self, line: &str) {
        println!("{line}");
    }
}

/// Forwards runner output to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, line: &str) {
        debug!(target: "mender::runner::output", "{}", line);
    }
}

/// Discards runner output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LineSink for NullSink {
    fn line(&self, _line: &str) {}
}

/// A fixed, deterministic test tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    /// Executable.
    pub program: String,

    /// Flags placed before the unit list.
    pub base_args: Vec<String>,

    /// Roots used when no subset is given. Missing roots are skipped.
    pub test_roots: Vec<PathBuf>,

    /// Working directory.
    pub cwd: PathBuf,

    /// Directory created before every run (report output).
    pub report_dir: Option<PathBuf>,
}

impl TestCommand {
    pub fn new(program: impl Into<String>, base_args: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args,
            test_roots: Vec::new(),
            cwd: cwd.into(),
            report_dir: None,
        }
    }

    pub fn with_test_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.test_roots = roots;
        self
    }

    /// `python -m pytest` with fixed parallelism, verbose output, no failure
    /// cap, and a self-contained HTML report.
    pub fn pytest(config: &MenderConfig) -> Self {
        let report_path = config.report_path();
        let mut base_args = vec![
            "-m".to_string(),
            "pytest".to_string(),
            "-n".to_string(),
            config.workers.to_string(),
            "-v".to_string(),
            "--maxfail=0".to_string(),
        ];
        if config.disable_warnings {
            base_args.push("--disable-warnings".to_string());
        }
        // The child resolves `--html` against its own cwd (the project root).
        base_args.push(format!("--html={}", config.report_target().display()));
        base_args.push("--self-contained-html".to_string());

        Self {
            program: config.program.clone(),
            base_args,
            test_roots: config.test_roots.clone(),
            cwd: config.project_root.clone(),
            report_dir: report_path.parent().map(Path::to_path_buf),
        }
    }

    /// Full argument vector for a run restricted to `subset`, or for every
    /// existing test root when `subset` is `None`.
    pub fn argv(&self, subset: Option<&[String]>) -> Vec<String> {
        let mut args = self.base_args.clone();
        match subset {
            Some(units) => args.extend(units.iter().cloned()),
            None => {
                for root in &self.test_roots {
                    if self.cwd.join(root).exists() {
                        args.push(root.to_string_lossy().into_owned());
                    } else {
                        debug!(root = %root.display(), "Skipping missing test root");
                    }
                }
            }
        }
        args
    }
}

/// Trait for test runner backends.
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the full suite (`subset = None`) or exactly the given units.
    ///
    /// Cancelling `cancel` kills the child and yields
    /// [`MenderError::Interrupted`].
    async fn run(&self, subset: Option<&[String]>, cancel: &CancellationToken)
        -> Result<RunResult>;
}

/// Runs a [`TestCommand`] as a child process.
#[derive(Clone)]
pub struct ProcessRunner {
    command: TestCommand,
    sink: Arc<dyn LineSink>,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl ProcessRunner {
    pub fn new(command: TestCommand) -> Self {
        Self {
            command,
            sink: Arc::new(ConsoleSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LineSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn command(&self) -> &TestCommand {
        &self.command
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(
        &self,
        subset: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let start = Instant::now();

        if let Some(dir) = &self.command.report_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let args = self.command.argv(subset);
        info!(
            program = %self.command.program,
            units = subset.map(|s| s.len()),
            "Running test suite"
        );

        let mut command = Command::new(&self.command.program);
        command
            .args(&args)
            .current_dir(&self.command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so parallel workers can be killed with the child.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| MenderError::Launch {
                program: self.command.program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain_lines(stderr, tx.clone())));
        }
        drop(tx);

        let mut output = String::new();
        let mut status = None;

        // Forward output while the child runs; the channel closes once both
        // pipes reach EOF.
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Cancellation requested; killing test runner");
                    terminate(&mut child).await;
                    for drain in &drains {
                        drain.abort();
                    }
                    return Err(MenderError::Interrupted);
                }
                line = rx.recv() => match line {
                    Some(line) => {
                        self.sink.line(&line);
                        output.push_str(&line);
                        output.push('\n');
                    }
                    None => break,
                },
                result = child.wait(), if status.is_none() => {
                    status = Some(result?);
                }
            }
        }

        let status = match status {
            Some(status) => status,
            None => tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Cancellation requested; killing test runner");
                    terminate(&mut child).await;
                    return Err(MenderError::Interrupted);
                }
                result = child.wait() => result?,
            },
        };

        for drain in drains {
            match drain.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "Output capture failed"),
                Err(err) => warn!(error = %err, "Output drain task panicked"),
            }
        }

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(exit_code, duration_ms, "Test suite finished");

        Ok(RunResult {
            exit_code,
            raw_output: output,
            duration_ms,
        })
    }
}

/// Kill the child and, on unix, every process in its group (xdist workers).
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{pid}");
        let signalled = Command::new("sh")
            .args(["-c", r#"kill -s KILL -- "$1""#, "sh", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match signalled {
            Ok(status) if status.success() => debug!(pid, "Killed test process group"),
            Ok(status) => debug!(pid, %status, "Process group kill reported failure"),
            Err(err) => warn!(error = %err, "Failed to signal test process group"),
        }
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill test runner");
    }
}

/// Read `reader` to EOF, sending each line (lossily decoded) to `tx`.
async fn drain_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(&['\n', '\r'][..])
            .to_string();
        if tx.send(line).is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct CollectSink {
        lines: Mutex<Vec<String>>,
    }

    impl LineSink for CollectSink {
        fn line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    fn sh(script: &str) -> ProcessRunner {
        let command = TestCommand::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            ".",
        );
        ProcessRunner::new(command).with_sink(Arc::new(NullSink))
    }

    #[test]
    fn test_pytest_argv_fixed_flags() {
        let config = MenderConfig::default().with_project_root("/proj");
        let command = TestCommand::pytest(&config);
        assert_eq!(command.program, "python3");
        assert_eq!(command.cwd, PathBuf::from("/proj"));

        let args = command.argv(Some(&["src/tests/test_login.py".to_string()]));
        assert_eq!(&args[..4], ["-m", "pytest", "-n", "3"]);
        assert!(args.contains(&"-v".to_string()));
        assert!(args.contains(&"--maxfail=0".to_string()));
        assert!(args.contains(&"--disable-warnings".to_string()));
        assert!(args.contains(&"--html=reports/html/report.html".to_string()));
        assert!(args.contains(&"--self-contained-html".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("src/tests/test_login.py"));
        assert_eq!(command.report_dir, Some(PathBuf::from("/proj/reports/html")));
    }

    #[test]
    fn test_relative_root_report_lands_once_under_root() {
        let config = MenderConfig::default().with_project_root("proj");
        let command = TestCommand::pytest(&config);

        let html = command
            .argv(Some(&[]))
            .into_iter()
            .find_map(|arg| arg.strip_prefix("--html=").map(PathBuf::from))
            .expect("--html flag");
        assert_eq!(command.cwd.join(&html), config.report_path());
        assert_eq!(config.report_path(), PathBuf::from("proj/reports/html/report.html"));
        assert_eq!(command.report_dir, Some(PathBuf::from("proj/reports/html")));
    }

    #[tokio::test]
    async fn test_report_written_where_report_path_points() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = MenderConfig {
            program: "sh".to_string(),
            ..Default::default()
        }
        .with_project_root(dir.path());
        let mut command = TestCommand::pytest(&config);
        // `sh -c` stands in for the interpreter and writes the `--html=`
        // target it receives.
        let mut args = vec![
            "-c".to_string(),
            r#"for a in "$@"; do case "$a" in --html=*) echo report > "${a#--html=}";; esac; done"#
                .to_string(),
            "sh".to_string(),
        ];
        args.extend(command.base_args);
        command.base_args = args;

        let result = ProcessRunner::new(command)
            .with_sink(Arc::new(NullSink))
            .run(Some(&[]), &CancellationToken::new())
            .await
            .expect("run");
        assert!(result.passed());
        assert!(config.report_path().is_file());
    }

    #[test]
    fn test_full_run_uses_existing_roots_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src/tests")).expect("mkdir");
        let config = MenderConfig {
            test_roots: vec![PathBuf::from("src/tests"), PathBuf::from("missing")],
            ..Default::default()
        }
        .with_project_root(dir.path());

        let command = TestCommand::pytest(&config);
        let args = command.argv(None);
        assert!(args.contains(&"src/tests".to_string()));
        assert!(!args.contains(&"missing".to_string()));
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let sink = Arc::new(CollectSink::default());
        let runner = sh("echo out; echo err 1>&2; exit 3").with_sink(sink.clone());

        let result = runner
            .run(None, &CancellationToken::new())
            .await
            .expect("run");
        assert_eq!(result.exit_code, 3);
        assert!(!result.passed());
        assert!(result.raw_output.contains("out\n"));
        assert!(result.raw_output.contains("err\n"));
        assert_eq!(sink.lines.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subset_passed_as_arguments() {
        let runner = sh("echo \"$@\"");
        let subset = vec!["tests/test_a.py".to_string(), "tests/test_b.py".to_string()];
        let result = runner
            .run(Some(&subset), &CancellationToken::new())
            .await
            .expect("run");
        assert!(result.passed());
        assert_eq!(result.raw_output, "tests/test_a.py tests/test_b.py\n");
    }

    #[tokio::test]
    async fn test_output_larger_than_pipe_buffer() {
        let runner = sh("i=0; while [ $i -lt 20000 ]; do echo \"FAILED tests/test_$i.py::case padding-padding\"; i=$((i+1)); done");
        let result = tokio::time::timeout(
            Duration::from_secs(60),
            runner.run(None, &CancellationToken::new()),
        )
        .await
        .expect("runner must not deadlock")
        .expect("run");
        assert_eq!(result.raw_output.lines().count(), 20000);
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let runner = ProcessRunner::new(TestCommand::new(
            "mender-definitely-missing-binary",
            Vec::new(),
            ".",
        ));
        let err = runner
            .run(None, &CancellationToken::new())
            .await
            .expect_err("spawn must fail");
        assert!(matches!(err, MenderError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let runner = sh("echo started; sleep 30");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(10), runner.run(None, &cancel))
            .await
            .expect("cancellation must be prompt")
            .expect_err("run must be interrupted");
        assert!(err.is_interrupted());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_kills_whole_process_group() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("worker.pid");
        let script = format!(
            "sleep 30 & echo $! > {}; echo started; wait",
            pid_file.display()
        );
        let runner = sh(&script);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = pid_file.clone();
        tokio::spawn(async move {
            while !watched.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(10), runner.run(None, &cancel))
            .await
            .expect("cancellation must be prompt")
            .expect_err("run must be interrupted");
        assert!(err.is_interrupted());

        let pid = std::fs::read_to_string(&pid_file).expect("pid file");
        let stat = Path::new("/proc").join(pid.trim()).join("stat");
        let mut worker_gone = false;
        for _ in 0..100 {
            // Dead, or a zombie waiting to be reaped by init.
            match std::fs::read_to_string(&stat) {
                Err(_) => worker_gone = true,
                Ok(line) => worker_gone = line.contains(") Z "),
            }
            if worker_gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(worker_gone, "background worker outlived cancellation");
    }

    #[tokio::test]
    async fn test_report_dir_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report_dir = dir.path().join("reports/html");
        let mut command = TestCommand::new("true", Vec::new(), dir.path());
        command.report_dir = Some(report_dir.clone());

        let result = ProcessRunner::new(command)
            .with_sink(Arc::new(NullSink))
            .run(None, &CancellationToken::new())
            .await
            .expect("run");
        assert!(result.passed());
        assert!(report_dir.is_dir());
    }
}
