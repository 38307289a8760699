//! Session configuration.
//!
//! Every path the heal cycle touches is derived from an explicit
//! [`MenderConfig`] handed to the orchestrator at construction.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MenderError, Result};

/// Default number of distinct failing units tolerated before healing is refused.
pub const DEFAULT_GUARDRAIL_THRESHOLD: usize = 5;

/// Default pytest-xdist worker count.
pub const DEFAULT_WORKERS: u32 = 3;

/// Configuration for one mender invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MenderConfig {
    /// Root that unit identifiers and test roots are resolved against.
    pub project_root: PathBuf,

    /// Test roots passed to the runner for a full-suite run.
    pub test_roots: Vec<PathBuf>,

    /// Directory holding the HTML report.
    pub report_dir: PathBuf,

    /// Report file name inside `report_dir`.
    pub report_file: String,

    /// Interpreter used to launch `-m pytest`.
    pub program: String,

    /// Parallel worker count.
    pub workers: u32,

    /// Maximum number of distinct failing units that may be healed.
    pub guardrail_threshold: usize,

    /// Whether to pass `--disable-warnings`.
    pub disable_warnings: bool,
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            test_roots: vec![PathBuf::from("src/tests")],
            report_dir: PathBuf::from("reports/html"),
            report_file: "report.html".to_string(),
            program: "python3".to_string(),
            workers: DEFAULT_WORKERS,
            guardrail_threshold: DEFAULT_GUARDRAIL_THRESHOLD,
            disable_warnings: true,
        }
    }
}

impl MenderConfig {
    /// Load a TOML config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the project root.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Reject values that would make a session meaningless: zero workers,
    /// a zero threshold, an empty program or report file name.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MenderError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.guardrail_threshold == 0 {
            return Err(MenderError::InvalidConfig(
                "guardrail_threshold must be at least 1".to_string(),
            ));
        }
        if self.program.trim().is_empty() {
            return Err(MenderError::InvalidConfig(
                "program must not be empty".to_string(),
            ));
        }
        if self.report_file.trim().is_empty() {
            return Err(MenderError::InvalidConfig(
                "report_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Location of the HTML report as seen from the mender process.
    pub fn report_path(&self) -> PathBuf {
        self.project_root.join(self.report_target())
    }

    /// Location of the HTML report as seen from the test process, which runs
    /// with `project_root` as its working directory.
    pub fn report_target(&self) -> PathBuf {
        self.report_dir.join(&self.report_file)
    }

    /// Resolve a unit identifier to a file under the project root.
    ///
    /// Absolute identifiers and identifiers that climb out of the root with
    /// `..` are rejected.
    pub fn resolve(&self, unit: &str) -> Result<PathBuf> {
        let relative = Path::new(unit);
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(MenderError::PathEscape(unit.to_string()));
                    }
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(MenderError::PathEscape(unit.to_string()));
                }
            }
        }
        if depth == 0 {
            return Err(MenderError::PathEscape(unit.to_string()));
        }
        Ok(self.project_root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MenderConfig::default();
        assert_eq!(config.workers, 3);
        assert_eq!(config.guardrail_threshold, 5);
        assert_eq!(config.test_roots, vec![PathBuf::from("src/tests")]);
        assert_eq!(
            config.report_path(),
            PathBuf::from("./reports/html/report.html")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = MenderConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = MenderConfig {
            guardrail_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mender.toml");
        std::fs::write(&path, "guardrail_threshold = 2\nprogram = \"python\"\n").expect("write");

        let config = MenderConfig::load(&path).expect("load");
        assert_eq!(config.guardrail_threshold, 2);
        assert_eq!(config.program, "python");
        assert_eq!(config.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_load_invalid_values_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mender.toml");
        std::fs::write(&path, "workers = 0\n").expect("write");
        assert!(matches!(
            MenderConfig::load(&path),
            Err(MenderError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_resolve_relative_unit() {
        let config = MenderConfig::default().with_project_root("/proj");
        let path = config.resolve("src/tests/test_login.py").expect("resolve");
        assert_eq!(path, PathBuf::from("/proj/src/tests/test_login.py"));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let config = MenderConfig::default().with_project_root("/proj");
        assert!(config.resolve("../outside.py").is_err());
        assert!(config.resolve("src/../../outside.py").is_err());
        assert!(config.resolve("/etc/passwd").is_err());
        assert!(config.resolve("").is_err());
        assert!(config.resolve("src/../tests/test_a.py").is_ok());
    }
}
