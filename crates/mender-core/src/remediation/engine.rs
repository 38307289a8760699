//! Applies the rule table to the files named in a failure map.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::MenderConfig;
use crate::digest::ContentDigest;
use crate::extract::FailureMap;
use crate::remediation::rules::RuleTable;

/// What happened to one unit during healing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileHealOutcome {
    /// Content changed and was written back.
    Patched {
        rules: Vec<String>,
        before: ContentDigest,
        after: ContentDigest,
    },
    /// No rule changed the content; the file was not written.
    NoSafeFix,
    /// The unit does not exist on disk.
    Missing,
    /// The unit identifier resolves outside the project root.
    Rejected { reason: String },
    /// The file exists but is not readable UTF-8 text.
    Unreadable { reason: String },
    /// A fix was found but writing it back failed; the file is unchanged.
    Unwritable { reason: String },
}

impl FileHealOutcome {
    /// Short label used in the human summary.
    pub fn label(&self) -> &'static str {
        match self {
            FileHealOutcome::Patched { .. } => "healed",
            FileHealOutcome::NoSafeFix => "no safe fix",
            FileHealOutcome::Missing => "missing",
            FileHealOutcome::Rejected { .. } => "rejected",
            FileHealOutcome::Unreadable { .. } => "unreadable",
            FileHealOutcome::Unwritable { .. } => "unwritable",
        }
    }
}

/// Per-unit heal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHealRecord {
    pub unit: String,
    pub outcome: FileHealOutcome,
}

/// Result of one heal pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealReport {
    pub records: Vec<FileHealRecord>,
}

impl HealReport {
    /// Units whose files were rewritten.
    pub fn patched(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, FileHealOutcome::Patched { .. }))
            .map(|r| r.unit.clone())
            .collect()
    }

    /// Units left untouched because no rule applied.
    pub fn no_safe_fix(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome == FileHealOutcome::NoSafeFix)
            .map(|r| r.unit.as_str())
            .collect()
    }

    /// Units named in the failure map but absent from disk.
    pub fn missing(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.outcome == FileHealOutcome::Missing)
            .map(|r| r.unit.as_str())
            .collect()
    }

    /// Units refused because they resolve outside the project root.
    pub fn rejected(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, FileHealOutcome::Rejected { .. }))
            .map(|r| r.unit.as_str())
            .collect()
    }

    /// Units whose fix could not be written back.
    pub fn unwritable(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| matches!(r.outcome, FileHealOutcome::Unwritable { .. }))
            .map(|r| r.unit.as_str())
            .collect()
    }

    /// Outcome recorded for `unit`, if it was in the failure map.
    pub fn outcome(&self, unit: &str) -> Option<&FileHealOutcome> {
        self.records
            .iter()
            .find(|r| r.unit == unit)
            .map(|r| &r.outcome)
    }
}

/// Deterministic, idempotent source patcher.
///
/// Only files named in the failure map are read, and only files whose text
/// actually changed are written. Files are never created or deleted.
#[derive(Debug, Clone)]
pub struct RemediationEngine {
    config: MenderConfig,
    rules: RuleTable,
}

impl RemediationEngine {
    /// Engine rooted at `config.project_root`.
    pub fn new(config: MenderConfig, rules: RuleTable) -> Self {
        Self { config, rules }
    }

    /// Configuration the engine resolves units against.
    pub fn config(&self) -> &MenderConfig {
        &self.config
    }

    /// Rules applied, in order, to every failing unit.
    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Heal every unit in `failures`, recording one outcome per unit.
    ///
    /// Per-file problems never stop the pass: a unit that cannot be
    /// resolved, read, or written is recorded and the next unit is tried.
    pub fn heal(&self, failures: &FailureMap) -> HealReport {
        let mut report = HealReport::default();

        for failing in failures.iter() {
            let outcome = match self.config.resolve(&failing.unit) {
                Ok(path) => self.heal_file(&failing.unit, path),
                Err(e) => {
                    warn!(unit = %failing.unit, error = %e, "Refusing to heal unit");
                    FileHealOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
            };
            report.records.push(FileHealRecord {
                unit: failing.unit.clone(),
                outcome,
            });
        }

        report
    }

    fn heal_file(&self, unit: &str, path: PathBuf) -> FileHealOutcome {
        if !path.is_file() {
            warn!(unit = %unit, path = %path.display(), "Failing unit not found on disk");
            return FileHealOutcome::Missing;
        }

        let original = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(unit = %unit, error = %e, "Failing unit is not readable text");
                return FileHealOutcome::Unreadable {
                    reason: e.to_string(),
                };
            }
        };
        let (healed, rules) = self
            .rules
            .rewrite(&self.config.project_root, &path, &original);

        if healed == original {
            info!(unit = %unit, "No safe fix applied");
            return FileHealOutcome::NoSafeFix;
        }

        if let Err(e) = std::fs::write(&path, healed.as_bytes()) {
            warn!(unit = %unit, error = %e, "Failed to write healed unit");
            return FileHealOutcome::Unwritable {
                reason: e.to_string(),
            };
        }
        info!(unit = %unit, rules = ?rules, "Healed");

        FileHealOutcome::Patched {
            rules,
            before: ContentDigest::from_bytes(original.as_bytes()),
            after: ContentDigest::from_bytes(healed.as_bytes()),
        }
    }
}
