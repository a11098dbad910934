//! Line coverage reports in the coverage.py JSON shape

use crate::coverage::CoverageError;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Line coverage of a single source file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCoverage {
    /// Lines that were executed
    pub executed: BTreeSet<u32>,

    /// Lines that hold executable statements
    pub statements: BTreeSet<u32>,
}

impl FileCoverage {
    pub fn covered_lines(&self) -> usize {
        self.executed.intersection(&self.statements).count()
    }

    pub fn missing_lines(&self) -> Vec<u32> {
        self.statements.difference(&self.executed).copied().collect()
    }

    fn merge(&mut self, other: &FileCoverage) {
        self.executed.extend(other.executed.iter().copied());
        self.statements.extend(other.statements.iter().copied());
    }
}

/// Coverage of a set of files, keyed by normalized path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageReport {
    pub files: BTreeMap<String, FileCoverage>,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(default)]
    files: BTreeMap<String, RawFile>,
}

#[derive(Deserialize)]
struct RawFile {
    #[serde(default)]
    executed_lines: Vec<u32>,
    #[serde(default)]
    missing_lines: Vec<u32>,
}

impl CoverageReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a coverage.py JSON report (`coverage json`)
    pub fn from_json(content: &str, origin: &str) -> Result<Self, CoverageError> {
        let raw: RawReport = serde_json::from_str(content).map_err(|e| CoverageError::Parse {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;

        let files = raw
            .files
            .into_iter()
            .map(|(path, file)| {
                let executed: BTreeSet<u32> = file.executed_lines.into_iter().collect();
                let mut statements: BTreeSet<u32> = file.missing_lines.into_iter().collect();
                statements.extend(executed.iter().copied());
                (normalize_path(&path), FileCoverage { executed, statements })
            })
            .collect();

        Ok(Self { files })
    }

    pub fn from_file(path: &Path) -> Result<Self, CoverageError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoverageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content, &path.display().to_string())
    }

    /// Union of two reports
    pub fn merge(&self, other: &CoverageReport) -> CoverageReport {
        let mut merged = self.clone();
        merged.merge_in(other);
        merged
    }

    pub fn merge_in(&mut self, other: &CoverageReport) {
        for (path, coverage) in &other.files {
            self.files.entry(path.clone()).or_default().merge(coverage);
        }
    }

    /// Merge every shard; an empty list is an error
    pub fn merge_all<'a, I>(shards: I) -> Result<CoverageReport, CoverageError>
    where
        I: IntoIterator<Item = &'a CoverageReport>,
    {
        let mut shards = shards.into_iter();
        let mut merged = shards.next().ok_or(CoverageError::NoShards)?.clone();
        for shard in shards {
            merged.merge_in(shard);
        }
        Ok(merged)
    }

    pub fn covered_lines(&self) -> usize {
        self.files.values().map(FileCoverage::covered_lines).sum()
    }

    pub fn num_statements(&self) -> usize {
        self.files.values().map(|f| f.statements.len()).sum()
    }

    /// Percentage of statements covered; 100.0 when there is nothing to cover
    pub fn percent(&self) -> f64 {
        percent(self.covered_lines(), self.num_statements())
    }

    /// Render as a coverage.py-shaped JSON document
    pub fn to_json(&self) -> serde_json::Value {
        let files: serde_json::Map<String, serde_json::Value> = self
            .files
            .iter()
            .map(|(path, file)| {
                let covered = file.covered_lines();
                let statements = file.statements.len();
                let missing = file.missing_lines();
                (
                    path.clone(),
                    json!({
                        "executed_lines": file.executed.iter().collect::<Vec<_>>(),
                        "missing_lines": missing,
                        "summary": {
                            "covered_lines": covered,
                            "num_statements": statements,
                            "missing_lines": statements - covered,
                            "percent_covered": percent(covered, statements),
                        }
                    }),
                )
            })
            .collect();

        let covered = self.covered_lines();
        let statements = self.num_statements();
        let pc = percent(covered, statements);

        json!({
            "meta": {
                "format": 2,
                "generator": concat!("devtools ", env!("CARGO_PKG_VERSION")),
            },
            "files": files,
            "totals": {
                "covered_lines": covered,
                "num_statements": statements,
                "missing_lines": statements - covered,
                "percent_covered": pc,
                "percent_covered_display": display_percent(pc),
            }
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), CoverageError> {
        let content = serde_json::to_string_pretty(&self.to_json()).map_err(|e| {
            CoverageError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        std::fs::write(path, content).map_err(|source| CoverageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn percent(covered: usize, statements: usize) -> f64 {
    if statements == 0 {
        100.0
    } else {
        100.0 * covered as f64 / statements as f64
    }
}

/// Whole-number display that never rounds up to 100 or down to 0
pub fn display_percent(pc: f64) -> String {
    let rounded = pc.round();
    let shown = if rounded >= 100.0 && pc < 100.0 {
        99.0
    } else if rounded <= 0.0 && pc > 0.0 {
        1.0
    } else {
        rounded
    };
    format!("{:.0}", shown)
}

// Shards from Windows runners use backslashes
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
