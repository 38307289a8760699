//! In-memory fakes for the runner trait (testing only)
//!
//! `ScriptedRunner` replays queued results without spawning anything and
//! records the subset of every call.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{MenderError, Result};
use crate::runner::{RunResult, TestRunner};

/// One scripted response.
#[derive(Debug, Clone)]
pub enum ScriptedRun {
    Complete(RunResult),
    Interrupted,
}

/// Test runner that replays a fixed script.
///
/// The cancellation token is ignored; queue [`ScriptedRun::Interrupted`] to
/// simulate an operator interrupt. Running past the end of the script yields
/// a passing empty run.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<Option<Vec<String>>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a completed run.
    pub fn then(self, result: RunResult) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedRun::Complete(result));
        self
    }

    /// Queue an interrupt.
    pub fn then_interrupt(self) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedRun::Interrupted);
        self
    }

    /// Subsets passed to each call, in order (`None` = full suite).
    pub fn calls(&self) -> Vec<Option<Vec<String>>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestRunner for ScriptedRunner {
    async fn run(
        &self,
        subset: Option<&[String]>,
        _cancel: &CancellationToken,
    ) -> Result<RunResult> {
        self.calls
            .lock()
            .unwrap()
            .push(subset.map(|units| units.to_vec()));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedRun::Complete(result)) => Ok(result),
            Some(ScriptedRun::Interrupted) => Err(MenderError::Interrupted),
            None => Ok(RunResult::new(0, "")),
        }
    }
}
