//! Deterministic source remediation.
//!
//! - [`rules`]: the ordered rewrite table and its preconditions
//! - [`engine`]: applies the table to failing units and reports per file

pub mod engine;
pub mod rules;

pub use engine::{FileHealOutcome, FileHealRecord, HealReport, RemediationEngine};
pub use rules::{Precondition, RewriteRule, RuleTable};
