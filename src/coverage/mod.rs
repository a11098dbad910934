//! Coverage aggregation
//!
//! Shards produced by the validation jobs of a matrix are merged line by
//! line, reduced to a single percentage, checked against a target and
//! published as a badge.

pub mod badge;
pub mod report;
pub mod target;

use std::path::PathBuf;
use thiserror::Error;

pub use badge::{badge_color, Badge, BadgeError, BadgeStore, FileBadgeStore, GistBadgeStore};
pub use report::{CoverageReport, FileCoverage};
pub use target::{CoverageTarget, TargetCheck};

/// Errors raised while aggregating coverage
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error(
        "Invalid coverage target {0}: expected 0 <= t < 1 (relative to the previous value) or 1 <= t <= 100 (absolute)"
    )]
    InvalidTarget(f64),

    #[error("Coverage {current:.2}% is below the target of {target:.2}%")]
    BelowTarget { current: f64, target: f64 },

    #[error("No coverage shards were provided")]
    NoShards,

    #[error("Failed to parse coverage report '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("Coverage I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
