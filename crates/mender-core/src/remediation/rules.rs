//! Deterministic rewrite rules.
//!
//! A rule is a regex, a replacement template, and a precondition on the file
//! being healed. Rules must be idempotent: the text a rule produces never
//! matches that rule's pattern again.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{MenderError, Result};

/// Condition a file must satisfy before a rule is tried on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Always,
    /// File extension without the dot, e.g. `py`.
    Extension(String),
    /// The project root contains this directory (the canonical import target).
    RootHasDir(PathBuf),
}

impl Precondition {
    pub fn holds(&self, root: &Path, file: &Path) -> bool {
        match self {
            Precondition::Always => true,
            Precondition::Extension(ext) => file
                .extension()
                .map(|e| e.to_string_lossy() == ext.as_str())
                .unwrap_or(false),
            Precondition::RootHasDir(dir) => root.join(dir).is_dir(),
        }
    }
}

/// One find/replace entry of a [`RuleTable`].
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub name: String,
    pattern: Regex,
    replacement: String,
    preconditions: Vec<Precondition>,
}

impl RewriteRule {
    /// Compile a rule. `replacement` follows `regex` template syntax (`$1`).
    pub fn new(name: impl Into<String>, pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| MenderError::Rule {
            rule: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name,
            pattern,
            replacement: replacement.into(),
            preconditions: Vec::new(),
        })
    }

    pub fn when(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn applies_to(&self, root: &Path, file: &Path) -> bool {
        self.preconditions.iter().all(|p| p.holds(root, file))
    }

    /// Rewrite every match. Borrows the input when nothing matched.
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.pattern.replace_all(text, self.replacement.as_str())
    }
}

/// Ordered rule table. Rules run top to bottom, each on the previous output.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RewriteRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, rule: RewriteRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RewriteRule> {
        self.rules.iter()
    }

    /// Stale-import normalization for a `src/`-rooted Python test project.
    ///
    /// Relative-to-`src` imports (`from pages.x`) are rewritten to the
    /// canonical absolute form (`from src.pages.x`), only on `.py` files and
    /// only when the project really has the canonical package directory.
    pub fn default_python() -> Result<Self> {
        let mut table = Self::new();
        for package in ["pages", "utils", "constants"] {
            let canonical = PathBuf::from("src").join(package);
            table = table
                .push(
                    RewriteRule::new(
                        format!("from-{package}-to-src-{package}"),
                        &format!(r"(?m)^([ \t]*)from\s+{package}\."),
                        format!("${{1}}from src.{package}."),
                    )?
                    .when(Precondition::Extension("py".to_string()))
                    .when(Precondition::RootHasDir(canonical.clone())),
                )
                .push(
                    RewriteRule::new(
                        format!("import-{package}-to-src-{package}"),
                        &format!(r"(?m)^([ \t]*)import\s+{package}\."),
                        format!("${{1}}import src.{package}."),
                    )?
                    .when(Precondition::Extension("py".to_string()))
                    .when(Precondition::RootHasDir(canonical)),
                );
        }
        Ok(table)
    }

    /// Run every applicable rule. Returns the final text and the names of
    /// the rules that changed it.
    pub fn rewrite(&self, root: &Path, file: &Path, text: &str) -> (String, Vec<String>) {
        let mut current = text.to_string();
        let mut applied = Vec::new();

        for rule in &self.rules {
            if !rule.applies_to(root, file) {
                continue;
            }
            let next = match rule.apply(&current) {
                Cow::Borrowed(_) => continue,
                Cow::Owned(next) => next,
            };
            if next != current {
                applied.push(rule.name.clone());
                current = next;
            }
        }

        (current, applied)
    }
}
