//! Failure extraction from runner output.
//!
//! Recognizes pytest's `FAILED <unit>::<case>` marker, line by line. The
//! marker shape is the contract between the runner and this module.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Failing cases of one unit, in the order they were first reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailingUnit {
    pub unit: String,
    pub cases: Vec<String>,
}

/// Mapping of unit identifier to failing case names.
///
/// Units keep first-seen order. Each FAILED line contributes one entry to its
/// unit's case list, so a case reported twice appears twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureMap {
    units: Vec<FailingUnit>,
    index: HashMap<String, usize>,
}

impl FailureMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `case` to the list for `unit`, creating the entry if absent.
    pub fn record(&mut self, unit: impl Into<String>, case: impl Into<String>) {
        let unit = unit.into();
        let case = case.into();
        match self.index.get(&unit) {
            Some(&pos) => self.units[pos].cases.push(case),
            None => {
                self.index.insert(unit.clone(), self.units.len());
                self.units.push(FailingUnit {
                    unit,
                    cases: vec![case],
                });
            }
        }
    }

    /// Number of distinct failing units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// True when no failure marker was found.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Whether `unit` has at least one failing case.
    pub fn contains(&self, unit: &str) -> bool {
        self.index.contains_key(unit)
    }

    /// Failing cases of `unit` in encounter order.
    pub fn cases(&self, unit: &str) -> Option<&[String]> {
        self.index
            .get(unit)
            .map(|&pos| self.units[pos].cases.as_slice())
    }

    /// Unit identifiers in first-seen order.
    pub fn units(&self) -> Vec<String> {
        self.units.iter().map(|u| u.unit.clone()).collect()
    }

    /// Iterate units with their cases in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &FailingUnit> {
        self.units.iter()
    }

    /// Total failing case entries across all units.
    pub fn total_cases(&self) -> usize {
        self.units.iter().map(|u| u.cases.len()).sum()
    }
}

impl Serialize for FailureMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.units.len()))?;
        for unit in &self.units {
            map.serialize_entry(&unit.unit, &unit.cases)?;
        }
        map.end()
    }
}

fn failed_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"FAILED\s+(\S+?)::(\S+)").expect("failure marker regex is valid")
    })
}

/// Parse raw runner output into a [`FailureMap`].
///
/// An empty map does not mean the run passed; callers check the exit code.
pub fn extract_failures(raw_output: &str) -> FailureMap {
    let marker = failed_marker();
    let mut failures = FailureMap::new();

    for line in raw_output.lines() {
        if let Some(caps) = marker.captures(line) {
            failures.record(&caps[1], &caps[2]);
        }
    }

    failures
}
