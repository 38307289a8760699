//! Single-cycle heal orchestration.
//!
//! `run all -> extract -> guardrail -> heal -> rerun failing units -> summary`.
//! Each step completes before the next begins, and at most one heal-and-rerun
//! cycle happens per invocation.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::MenderConfig;
use crate::error::{MenderError, Result};
use crate::extract::extract_failures;
use crate::guardrail::GuardrailPolicy;
use crate::remediation::{HealReport, RemediationEngine, RuleTable};
use crate::runner::TestRunner;
use crate::session::{HealingSession, SessionOutcome, SessionSummary};

/// Heal-cycle entry point.
pub struct Orchestrator<R> {
    runner: R,
    policy: GuardrailPolicy,
    engine: RemediationEngine,
}

impl<R: TestRunner> Orchestrator<R> {
    /// Build from an explicit config with the default Python rule table.
    pub fn new(config: MenderConfig, runner: R) -> Result<Self> {
        config.validate()?;
        let policy = GuardrailPolicy::new(config.guardrail_threshold);
        let engine = RemediationEngine::new(config, RuleTable::default_python()?);
        Ok(Self {
            runner,
            policy,
            engine,
        })
    }

    /// Replace the rewrite rule table.
    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.engine = RemediationEngine::new(self.engine.config().clone(), rules);
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn policy(&self) -> GuardrailPolicy {
        self.policy
    }

    /// Run one session.
    ///
    /// Returns `Err(MenderError::Interrupted)` if `cancel` fires during any
    /// run; no healing or rerun happens after an interrupt.
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<SessionSummary> {
        let session_id = Uuid::new_v4();
        let span = info_span!("mender.session", session_id = %session_id);
        self.execute_session(session_id, cancel).instrument(span).await
    }

    async fn execute_session(
        &self,
        session_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary> {
        let started_at = Utc::now();
        let mut session = HealingSession::default();

        info!(event = "session.started", "Running full test suite");
        let initial = self.runner.run(None, cancel).await?;

        let finish = |session: HealingSession,
                      outcome: SessionOutcome,
                      heal_report: Option<HealReport>,
                      rerun_exit_code: Option<i32>| {
            let summary = SessionSummary {
                session_id,
                outcome,
                initial_exit_code: initial.exit_code,
                initial_failure_count: session.initial_failures.len(),
                initial_failures: session.initial_failures,
                heal_report,
                rerun_exit_code,
                started_at,
                finished_at: Utc::now(),
            };
            info!(
                event = "session.finished",
                outcome = ?summary.outcome,
                final_passed = summary.final_passed(),
            );
            summary
        };

        if initial.passed() {
            info!("All tests passed; no healing required");
            return Ok(finish(session, SessionOutcome::Passed, None, None));
        }

        session.initial_failures = extract_failures(&initial.raw_output);
        if session.initial_failures.is_empty() {
            warn!(
                exit_code = initial.exit_code,
                "Test run failed but no test failures were detected"
            );
            let outcome = SessionOutcome::Unparseable {
                exit_code: initial.exit_code,
            };
            return Ok(finish(session, outcome, None, None));
        }

        let verdict = self.policy.evaluate(&session.initial_failures);
        if !verdict.safe {
            warn!(
                distinct_units = verdict.distinct_units,
                threshold = verdict.threshold,
                "Environment-level failure detected; skipping healing"
            );
            return Ok(finish(
                session,
                SessionOutcome::GuardrailAbort { verdict },
                None,
                None,
            ));
        }

        if cancel.is_cancelled() {
            return Err(MenderError::Interrupted);
        }

        info!(
            units = session.initial_failures.len(),
            cases = session.initial_failures.total_cases(),
            "Healing failed tests"
        );
        let report = self.engine.heal(&session.initial_failures);
        session.patched_files = report.patched();

        // Rerun exactly the initially failing units.
        let subset = session.initial_failures.units();
        info!(units = subset.len(), patched = session.patched_files.len(), "Re-running healed tests");
        let rerun = self.runner.run(Some(&subset), cancel).await?;
        let rerun_passed = rerun.passed();
        let rerun_exit_code = rerun.exit_code;
        session.rerun_result = Some(rerun);

        Ok(finish(
            session,
            SessionOutcome::Healed { rerun_passed },
            Some(report),
            Some(rerun_exit_code),
        ))
    }
}
