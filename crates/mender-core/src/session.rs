//! Healing session state and its summary.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::extract::FailureMap;
use crate::guardrail::GuardrailVerdict;
use crate::remediation::{FileHealOutcome, HealReport};
use crate::runner::RunResult;

/// State of one invocation. Lives only as long as the invocation.
#[derive(Debug, Clone, Default)]
pub struct HealingSession {
    pub initial_failures: FailureMap,
    pub patched_files: BTreeSet<String>,
    pub rerun_result: Option<RunResult>,
}

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The full suite passed; nothing was parsed or healed.
    Passed,
    /// The suite failed but no failure marker was found.
    Unparseable { exit_code: i32 },
    /// Too many distinct units failed; nothing was touched.
    GuardrailAbort { verdict: GuardrailVerdict },
    /// Healing ran and the previously failing units were rerun.
    Healed { rerun_passed: bool },
}

/// Structured summary produced by every terminal state.
///
/// Serializes with a derived `final_passed` field next to the stored ones.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    pub initial_exit_code: i32,
    pub initial_failure_count: usize,
    pub initial_failures: FailureMap,
    pub heal_report: Option<HealReport>,
    pub rerun_exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Whether the session ends with a passing suite.
    pub fn final_passed(&self) -> bool {
        matches!(
            self.outcome,
            SessionOutcome::Passed | SessionOutcome::Healed { rerun_passed: true }
        )
    }

    pub fn patched_files(&self) -> BTreeSet<String> {
        self.heal_report
            .as_ref()
            .map(HealReport::patched)
            .unwrap_or_default()
    }
}

impl Serialize for SessionSummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SessionSummary", 10)?;
        state.serialize_field("session_id", &self.session_id)?;
        state.serialize_field("outcome", &self.outcome)?;
        state.serialize_field("final_passed", &self.final_passed())?;
        state.serialize_field("initial_exit_code", &self.initial_exit_code)?;
        state.serialize_field("initial_failure_count", &self.initial_failure_count)?;
        state.serialize_field("initial_failures", &self.initial_failures)?;
        state.serialize_field("heal_report", &self.heal_report)?;
        state.serialize_field("rerun_exit_code", &self.rerun_exit_code)?;
        state.serialize_field("started_at", &self.started_at)?;
        state.serialize_field("finished_at", &self.finished_at)?;
        state.end()
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Healing Summary")?;
        writeln!(f, "----------------------------")?;
        match &self.outcome {
            SessionOutcome::Passed => {
                writeln!(f, "All tests passed. No healing required.")?;
            }
            SessionOutcome::Unparseable { exit_code } => {
                writeln!(
                    f,
                    "Test run failed (exit code {exit_code}) but no test failures were detected."
                )?;
                writeln!(f, "No healing attempted.")?;
            }
            SessionOutcome::GuardrailAbort { verdict } => {
                writeln!(f, "Environment-level failure detected: {}", verdict.reason)?;
                writeln!(f, "Skipping healing to avoid unsafe changes.")?;
            }
            SessionOutcome::Healed { .. } => {
                let patched = self.patched_files();
                writeln!(f, "Patched Files: {}", patched.len())?;
                for unit in &patched {
                    writeln!(f, "  healed: {unit}")?;
                }
                let unhealed = self
                    .heal_report
                    .iter()
                    .flat_map(|report| &report.records)
                    .filter(|r| !matches!(r.outcome, FileHealOutcome::Patched { .. }));
                for record in unhealed {
                    match &record.outcome {
                        FileHealOutcome::Rejected { reason }
                        | FileHealOutcome::Unreadable { reason }
                        | FileHealOutcome::Unwritable { reason } => writeln!(
                            f,
                            "  {}: {} ({reason})",
                            record.outcome.label(),
                            record.unit
                        )?,
                        other => writeln!(f, "  {}: {}", other.label(), record.unit)?,
                    }
                }
            }
        }
        writeln!(f, "Initial Failures: {}", self.initial_failure_count)?;
        write!(
            f,
            "Final Status: {}",
            if self.final_passed() { "PASS" } else { "STILL FAILING" }
        )
    }
}
