//! Mender Core - bounded test remediation
//!
//! Runs a test suite, classifies failures from its output, applies narrowly
//! scoped deterministic patches for mechanically detectable drift, and reruns
//! exactly the units that failed.
//!
//! ## Components
//!
//! - [`runner`]: spawns the test tool and streams its output
//! - [`extract`]: parses `FAILED <unit>::<case>` markers into a [`FailureMap`]
//! - [`guardrail`]: refuses to heal when failures look environmental
//! - [`remediation`]: idempotent rewrite rules applied to failing units
//! - [`orchestrator`]: the single-cycle session state machine

pub mod config;
pub mod digest;
pub mod error;
pub mod extract;
pub mod fakes;
pub mod guardrail;
pub mod orchestrator;
pub mod remediation;
pub mod runner;
pub mod session;
pub mod telemetry;

pub use config::{MenderConfig, DEFAULT_GUARDRAIL_THRESHOLD, DEFAULT_WORKERS};
pub use digest::ContentDigest;
pub use error::{MenderError, Result};
pub use extract::{extract_failures, FailingUnit, FailureMap};
pub use guardrail::{is_safe_to_heal, GuardrailPolicy, GuardrailVerdict};
pub use orchestrator::Orchestrator;
pub use remediation::{
    FileHealOutcome, FileHealRecord, HealReport, Precondition, RemediationEngine, RewriteRule,
    RuleTable,
};
pub use runner::{
    ConsoleSink, LineSink, NullSink, ProcessRunner, RunResult, TestCommand, TestRunner,
    TracingSink,
};
pub use session::{HealingSession, SessionOutcome, SessionSummary};
pub use telemetry::init_tracing;

pub use tokio_util::sync::CancellationToken;
