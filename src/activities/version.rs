//! Version stamping

use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Matches the `__version__ = ...` line of a python module
pub const DEFAULT_VERSION_PATTERN: &str = r"(?m)^__version__\s*=\s*.*$";

/// Replacement for the matched line; `{version}` is substituted
pub const DEFAULT_VERSION_REPLACEMENT: &str = "__version__ = \"{version}\"";

fn default_pattern() -> String {
    DEFAULT_VERSION_PATTERN.to_string()
}

fn default_replacement() -> String {
    DEFAULT_VERSION_REPLACEMENT.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateVersionOptions {
    /// File holding the version line (`src/mypkg/__init__.py`)
    pub version_file: PathBuf,

    /// Version to stamp; computed from git tags when unset
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default = "default_pattern")]
    pub pattern: String,

    #[serde(default = "default_replacement")]
    pub replacement: String,
}

/// Parse a version, tolerating a leading `v`
pub fn parse_version(value: &str) -> Result<semver::Version, ActivityError> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    semver::Version::parse(trimmed)
        .map_err(|e| ActivityError::Invalid(format!("'{}' is not a semantic version: {}", value.trim(), e)))
}

/// The most recent tag reachable from HEAD
pub async fn describe_version(ctx: &ActivityContext<'_>) -> Result<semver::Version, ActivityError> {
    let command = CommandDescriptor::new("git").args(["describe", "--tags", "--abbrev=0"]);
    let output = ctx.exec("Calculating version", command).await?;
    let tag = output.output.lines().last().unwrap_or_default().trim().to_string();
    parse_version(&tag)
}

/// The explicit version if given, otherwise the latest tag
pub async fn resolve_version(
    explicit: Option<&str>,
    ctx: &ActivityContext<'_>,
) -> Result<semver::Version, ActivityError> {
    match explicit {
        Some(version) => parse_version(version),
        None => describe_version(ctx).await,
    }
}

/// Replace the first match of `pattern` with the stamped version
pub fn stamp_version(
    content: &str,
    pattern: &str,
    replacement: &str,
    version: &semver::Version,
) -> Result<String, ActivityError> {
    let regex = Regex::new(pattern)
        .map_err(|e| ActivityError::Invalid(format!("Invalid version pattern '{}': {}", pattern, e)))?;
    if !regex.is_match(content) {
        return Err(ActivityError::Invalid(format!(
            "No line matching '{}' was found",
            pattern
        )));
    }

    let line = replacement.replace("{version}", &version.to_string());
    Ok(regex
        .replacen(content, 1, regex::NoExpand(&line))
        .into_owned())
}

pub async fn run(
    options: &UpdateVersionOptions,
    ctx: &ActivityContext<'_>,
) -> Result<semver::Version, ActivityError> {
    let version = resolve_version(options.version.as_deref(), ctx).await?;
    let path = ctx.resolve(&options.version_file);

    let content = std::fs::read_to_string(&path).map_err(|e| ActivityError::io(&path, e))?;
    let updated = stamp_version(&content, &options.pattern, &options.replacement, &version)?;
    std::fs::write(&path, updated).map_err(|e| ActivityError::io(&path, e))?;

    info!("Updated '{}' to version {}", path.display(), version);
    Ok(version)
}
