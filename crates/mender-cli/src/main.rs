//! Mender - bounded test remediation CLI
//!
//! ## Commands
//!
//! - `heal`: run the suite, heal mechanically detectable drift, rerun failures
//! - `extract`: print the failure map parsed from a saved runner log
//! - `plan save`: store a manual test plan as Markdown
//! - `generate`: write a generated source file under `src/` without clobbering

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use mender_core::{
    extract_failures, init_tracing, CancellationToken, ConsoleSink, LineSink, MenderConfig,
    Orchestrator, ProcessRunner, SessionSummary, TestCommand, TracingSink,
};
use mender_scaffold::{save_plan, write_generated_file, PLANS_DIR};

/// Config file picked up from the project root when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "mender.toml";

const EXIT_PASSED: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "mender")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run tests, heal import-path drift, rerun the failures", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs and a JSON summary
    #[arg(long, global = true)]
    json: bool,

    /// Path to a TOML config file
    #[arg(short, long, global = true, env = "MENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Project root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one healing session
    Heal {
        /// Maximum distinct failing units that may be healed
        #[arg(long)]
        threshold: Option<usize>,

        /// Parallel test workers
        #[arg(long)]
        workers: Option<u32>,
    },

    /// Parse a saved runner log and print its failure map
    Extract {
        /// Log file to parse
        log: PathBuf,
    },

    /// Manage manual test plans
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Write a generated source file under src/
    Generate {
        /// Target path relative to the project root
        rel_path: String,

        /// File holding the generated source
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum PlanAction {
    /// Save a Markdown plan
    Save {
        /// Plan name (without extension)
        name: String,

        /// Markdown file to store
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.root.as_deref())?;

    match cli.command {
        Commands::Heal { threshold, workers } => {
            cmd_heal(config, threshold, workers, cli.json).await
        }
        Commands::Extract { log } => cmd_extract(&log),
        Commands::Plan { action } => match action {
            PlanAction::Save { name, file } => cmd_plan_save(&config, &name, &file),
        },
        Commands::Generate { rel_path, file } => cmd_generate(&config, &rel_path, &file),
    }
}

fn load_config(explicit: Option<&Path>, root: Option<&Path>) -> Result<MenderConfig> {
    let config = match explicit {
        Some(path) => MenderConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let candidate = root.unwrap_or(Path::new(".")).join(DEFAULT_CONFIG_FILE);
            if candidate.is_file() {
                MenderConfig::load(&candidate)
                    .with_context(|| format!("Failed to load config {}", candidate.display()))?
            } else {
                MenderConfig::default()
            }
        }
    };

    Ok(match root {
        Some(root) => config.with_project_root(root),
        None => config,
    })
}

async fn cmd_heal(
    mut config: MenderConfig,
    threshold: Option<usize>,
    workers: Option<u32>,
    json: bool,
) -> Result<ExitCode> {
    if let Some(threshold) = threshold {
        config.guardrail_threshold = threshold;
    }
    if let Some(workers) = workers {
        config.workers = workers;
    }

    // Runner output goes to the console unless stdout is reserved for JSON.
    let sink: Arc<dyn LineSink> = if json {
        Arc::new(TracingSink)
    } else {
        Arc::new(ConsoleSink)
    };
    let runner = ProcessRunner::new(TestCommand::pytest(&config)).with_sink(sink);
    let orchestrator = Orchestrator::new(config, runner).context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping test run");
            on_signal.cancel();
        }
    });

    let result = orchestrator.execute(&cancel).await;
    let code = exit_status(&result);
    match result {
        Ok(summary) if json => println!("{}", serde_json::to_string_pretty(&summary)?),
        Ok(summary) => println!("{summary}"),
        Err(e) if e.is_interrupted() => eprintln!("Interrupted."),
        Err(e) => return Err(e).context("Healing session failed"),
    }

    Ok(ExitCode::from(code))
}

/// Process exit status for a finished heal session: 0 when the suite passed
/// (initially or after healing), 130 when interrupted, 1 otherwise.
fn exit_status(result: &mender_core::Result<SessionSummary>) -> u8 {
    match result {
        Ok(summary) if summary.final_passed() => EXIT_PASSED,
        Ok(_) => EXIT_FAILED,
        Err(e) if e.is_interrupted() => EXIT_INTERRUPTED,
        Err(_) => EXIT_FAILED,
    }
}

fn cmd_extract(log: &Path) -> Result<ExitCode> {
    let raw = std::fs::read(log).with_context(|| format!("Failed to read {}", log.display()))?;
    let failures = extract_failures(&String::from_utf8_lossy(&raw));
    info!(
        units = failures.len(),
        cases = failures.total_cases(),
        "Failures extracted"
    );
    println!("{}", serde_json::to_string_pretty(&failures)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_plan_save(config: &MenderConfig, name: &str, file: &Path) -> Result<ExitCode> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let plans_dir = config.project_root.join(PLANS_DIR);
    let saved = save_plan(&plans_dir, name, &content)?;
    println!("{} ({})", saved.message, saved.path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_generate(config: &MenderConfig, rel_path: &str, file: &Path) -> Result<ExitCode> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let saved = write_generated_file(&config.project_root, rel_path, &content)?;
    println!("{} ({})", saved.message, saved.path.display());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use mender_core::fakes::ScriptedRunner;
    use mender_core::{MenderError, RunResult, SessionOutcome};

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_heal_overrides_parse() {
        let cli = Cli::try_parse_from(["mender", "--json", "heal", "--threshold", "2"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Heal { threshold, workers } => {
                assert_eq!(threshold, Some(2));
                assert_eq!(workers, None);
            }
            _ => panic!("expected heal"),
        }
    }

    #[test]
    fn test_plan_save_parse() {
        let cli = Cli::try_parse_from(["mender", "plan", "save", "login", "--file", "p.md"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Plan {
                action: PlanAction::Save { .. }
            }
        ));
    }

    async fn session(runner: ScriptedRunner) -> mender_core::Result<SessionSummary> {
        let dir = tempfile::tempdir().unwrap();
        let config = MenderConfig::default().with_project_root(dir.path());
        Orchestrator::new(config, runner)
            .unwrap()
            .execute(&CancellationToken::new())
            .await
    }

    fn failing(units: usize) -> RunResult {
        let output: String = (0..units)
            .map(|i| format!("FAILED src/tests/test_{i}.py::case\n"))
            .collect();
        RunResult::new(1, output)
    }

    #[tokio::test]
    async fn test_exit_status_passed() {
        let result = session(ScriptedRunner::new().then(RunResult::new(0, ""))).await;
        assert!(matches!(result, Ok(ref s) if s.outcome == SessionOutcome::Passed));
        assert_eq!(exit_status(&result), 0);
    }

    #[tokio::test]
    async fn test_exit_status_healed_rerun_passed() {
        let runner = ScriptedRunner::new()
            .then(failing(1))
            .then(RunResult::new(0, ""));
        let result = session(runner).await;
        assert!(matches!(
            result,
            Ok(ref s) if s.outcome == SessionOutcome::Healed { rerun_passed: true }
        ));
        assert_eq!(exit_status(&result), 0);
    }

    #[tokio::test]
    async fn test_exit_status_healed_rerun_failed() {
        let runner = ScriptedRunner::new().then(failing(1)).then(failing(1));
        let result = session(runner).await;
        assert!(matches!(
            result,
            Ok(ref s) if s.outcome == SessionOutcome::Healed { rerun_passed: false }
        ));
        assert_eq!(exit_status(&result), 1);
    }

    #[tokio::test]
    async fn test_exit_status_guardrail_abort() {
        let result = session(ScriptedRunner::new().then(failing(6))).await;
        assert!(matches!(
            result,
            Ok(ref s) if matches!(s.outcome, SessionOutcome::GuardrailAbort { .. })
        ));
        assert_eq!(exit_status(&result), 1);
    }

    #[tokio::test]
    async fn test_exit_status_unparseable() {
        let result = session(ScriptedRunner::new().then(RunResult::new(2, "collection error"))).await;
        assert!(matches!(
            result,
            Ok(ref s) if s.outcome == SessionOutcome::Unparseable { exit_code: 2 }
        ));
        assert_eq!(exit_status(&result), 1);
    }

    #[tokio::test]
    async fn test_exit_status_interrupted() {
        let result = session(ScriptedRunner::new().then_interrupt()).await;
        assert!(matches!(result, Err(MenderError::Interrupted)));
        assert_eq!(exit_status(&result), 130);
    }

    #[test]
    fn test_exit_status_other_error() {
        let result = Err(MenderError::InvalidConfig("bad".to_string()));
        assert_eq!(exit_status(&result), 1);
    }

    #[test]
    fn test_load_config_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(None, Some(dir.path())).unwrap();
        assert_eq!(config.project_root, dir.path());
        assert_eq!(config.workers, mender_core::DEFAULT_WORKERS);
    }

    #[test]
    fn test_load_config_picks_up_root_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "guardrail_threshold = 2\nworkers = 8\n",
        )
        .unwrap();

        let config = load_config(None, Some(dir.path())).unwrap();
        assert_eq!(config.guardrail_threshold, 2);
        assert_eq!(config.workers, 8);
        assert_eq!(config.project_root, dir.path());
    }

    #[test]
    fn test_load_config_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "workers = \"many\"\n").unwrap();
        assert!(load_config(Some(&path), None).is_err());
    }
}
