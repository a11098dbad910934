//! Floating CI tags (`v1.2.3`, `v1.2`, `v1`) for a version

use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

const TAG_PATTERN: &str = r"^(?P<prefix>.*?)(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)$";

fn default_remote() -> String {
    "origin".to_string()
}

fn default_message() -> String {
    "🤖 Updated CI Version".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiTagsOptions {
    /// `<prefix><major>.<minor>.<patch>`; the latest tag when unset
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_message")]
    pub message: String,
}

impl Default for CiTagsOptions {
    fn default() -> Self {
        Self {
            version: None,
            dry_run: false,
            remote: default_remote(),
            message: default_message(),
        }
    }
}

/// Tags to create for a version, most specific first
pub fn ci_tags(version: &str) -> Result<Vec<String>, ActivityError> {
    let regex = Regex::new(TAG_PATTERN).map_err(|e| ActivityError::Invalid(e.to_string()))?;
    let captures = regex.captures(version.trim()).ok_or_else(|| {
        ActivityError::Invalid(format!("'{}' is not in a supported format", version.trim()))
    })?;

    let prefix = &captures["prefix"];
    let major = &captures["major"];
    let minor = &captures["minor"];
    let patch = &captures["patch"];

    Ok(vec![
        format!("{}{}.{}.{}", prefix, major, minor, patch),
        format!("{}{}.{}", prefix, major, minor),
        format!("{}{}", prefix, major),
    ])
}

pub async fn run(options: &CiTagsOptions, ctx: &ActivityContext<'_>) -> Result<Vec<String>, ActivityError> {
    let version = match &options.version {
        Some(version) => version.clone(),
        None => {
            let command = CommandDescriptor::new("git").args(["describe", "--tags", "--abbrev=0"]);
            let output = ctx.exec("Calculating version", command).await?;
            output.output.lines().last().unwrap_or_default().trim().to_string()
        }
    };

    let tags = ci_tags(&version)?;
    if options.dry_run {
        for tag in &tags {
            info!("Would create and push tag '{}'", tag);
        }
        info!("Dry run; no tags were created");
        return Ok(tags);
    }

    for tag in &tags {
        let command = CommandDescriptor::new("git")
            .args(["tag", "--force", "-m"])
            .arg(&options.message)
            .arg(tag);
        ctx.exec("Creating tag", command).await?;
    }
    for tag in &tags {
        let command = CommandDescriptor::new("git")
            .args(["push", "--force"])
            .arg(&options.remote)
            .arg(tag);
        ctx.exec("Pushing tag", command).await?;
    }

    Ok(tags)
}
