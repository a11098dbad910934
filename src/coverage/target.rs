//! Coverage targets
//!
//! A single number encodes two kinds of target: values in `[0, 1)` are a
//! fraction of the previously published coverage, values in `[1, 100]` are
//! an absolute percentage. `1.0` itself is absolute.

use crate::coverage::CoverageError;
use tracing::warn;

/// Tolerance for float comparisons against the effective target
const EPSILON: f64 = 1e-9;

/// How the current coverage is judged
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverageTarget {
    /// Fraction of the previous coverage value
    Relative(f64),
    /// Absolute percentage
    Absolute(f64),
}

/// Result of a successful target check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetCheck {
    /// Coverage met the effective target
    Met { target: f64 },
    /// Relative target without a previous value to compare against
    NoBaseline,
}

impl CoverageTarget {
    pub fn parse(value: f64) -> Result<Self, CoverageError> {
        if (0.0..1.0).contains(&value) {
            Ok(Self::Relative(value))
        } else if (1.0..=100.0).contains(&value) {
            Ok(Self::Absolute(value))
        } else {
            Err(CoverageError::InvalidTarget(value))
        }
    }

    /// Effective percentage to meet, if one can be computed
    pub fn effective(&self, previous: Option<f64>) -> Option<f64> {
        match *self {
            Self::Relative(fraction) => previous.map(|p| fraction * p),
            Self::Absolute(target) => Some(target),
        }
    }

    pub fn check(&self, current: f64, previous: Option<f64>) -> Result<TargetCheck, CoverageError> {
        let Some(target) = self.effective(previous) else {
            warn!(
                "No previous coverage value; relative target {:?} cannot be checked",
                self
            );
            return Ok(TargetCheck::NoBaseline);
        };

        if current + EPSILON < target {
            Err(CoverageError::BelowTarget { current, target })
        } else {
            Ok(TargetCheck::Met { target })
        }
    }
}

impl std::str::FromStr for CoverageTarget {
    type Err = CoverageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| CoverageError::InvalidTarget(f64::NAN))?;
        Self::parse(value)
    }
}
