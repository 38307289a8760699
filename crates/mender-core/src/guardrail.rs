//! Breadth guardrail for automated healing.
//!
//! A failure map spanning many distinct units points at the environment
//! (missing dependency, unreachable target, broken fixture), not at textual
//! drift. Past the threshold nothing is opened for writing.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_GUARDRAIL_THRESHOLD;
use crate::extract::FailureMap;

/// Outcome of a guardrail evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub safe: bool,
    pub distinct_units: usize,
    pub threshold: usize,
    pub reason: String,
}

/// Guardrail policy: heal only when `1 <= distinct units <= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailPolicy {
    pub threshold: usize,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_GUARDRAIL_THRESHOLD,
        }
    }
}

impl GuardrailPolicy {
    /// Policy allowing at most `threshold` distinct failing units.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Whether healing `failures` is allowed.
    pub fn is_safe_to_heal(&self, failures: &FailureMap) -> bool {
        is_safe_to_heal(failures, self.threshold)
    }

    /// Decide on `failures` and explain the decision.
    pub fn evaluate(&self, failures: &FailureMap) -> GuardrailVerdict {
        let distinct_units = failures.len();
        let safe = is_safe_to_heal(failures, self.threshold);
        let reason = if failures.is_empty() {
            "no failing units to heal".to_string()
        } else if safe {
            format!(
                "{} failing unit(s) within threshold {}",
                distinct_units, self.threshold
            )
        } else {
            format!(
                "{} failing units exceed threshold {}; likely an environment-level failure",
                distinct_units, self.threshold
            )
        };

        GuardrailVerdict {
            safe,
            distinct_units,
            threshold: self.threshold,
            reason,
        }
    }
}

/// Safe iff `failures` is non-empty and has at most `threshold` distinct units.
pub fn is_safe_to_heal(failures: &FailureMap, threshold: usize) -> bool {
    !failures.is_empty() && failures.len() <= threshold
}
