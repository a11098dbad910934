//! Coverage aggregation across the shards of a matrix

use crate::activities::{ActivityContext, ActivityError};
use crate::coverage::{
    Badge, BadgeStore, CoverageReport, CoverageTarget, FileBadgeStore, GistBadgeStore, TargetCheck,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

fn default_artifact_prefix() -> String {
    "coverage-".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("coverage.json")
}

fn default_merged_artifact() -> Option<String> {
    Some("coverage".to_string())
}

fn default_label() -> String {
    "coverage".to_string()
}

/// Where the coverage badge lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "store", rename_all = "snake_case")]
pub enum BadgeLocation {
    Gist {
        gist_id: String,
        file_name: String,
        /// Environment variable holding the API token
        token_env: String,
    },
    File {
        path: PathBuf,
    },
}

impl BadgeLocation {
    pub fn open(&self, ctx: &ActivityContext<'_>) -> Result<Box<dyn BadgeStore>, ActivityError> {
        match self {
            Self::Gist {
                gist_id,
                file_name,
                token_env,
            } => {
                let token = ctx.secret(token_env)?;
                Ok(Box::new(GistBadgeStore::new(gist_id, file_name, token)?))
            }
            Self::File { path } => Ok(Box::new(FileBadgeStore::new(ctx.resolve(path)))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageOptions {
    /// Artifacts with this name prefix are treated as shards
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    /// Shard files used in addition to artifacts
    #[serde(default)]
    pub shards: Vec<PathBuf>,

    /// Merged report
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Artifact the merged report is uploaded as once the target is met
    /// (`null` to skip the upload)
    #[serde(default = "default_merged_artifact")]
    pub artifact: Option<String>,

    /// `[0, 1)` relative to the published badge, `[1, 100]` absolute
    #[serde(default)]
    pub target: Option<f64>,

    #[serde(default)]
    pub badge: Option<BadgeLocation>,

    #[serde(default = "default_label")]
    pub label: String,

    /// Publish the new badge once the target is met
    #[serde(default)]
    pub publish: bool,
}

impl Default for CoverageOptions {
    fn default() -> Self {
        Self {
            artifact_prefix: default_artifact_prefix(),
            shards: Vec::new(),
            output: default_output(),
            artifact: default_merged_artifact(),
            target: None,
            badge: None,
            label: default_label(),
            publish: false,
        }
    }
}

/// Outcome of an aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    pub percent: f64,
    pub previous: Option<f64>,
    pub check: Option<TargetCheck>,
    pub shards: usize,
}

fn collect_shards(
    options: &CoverageOptions,
    ctx: &ActivityContext<'_>,
    staging: &std::path::Path,
) -> Result<Vec<CoverageReport>, ActivityError> {
    let mut reports = Vec::new();

    if let Some(store) = ctx.artifacts {
        for artifact in store.list()? {
            if !artifact.name.starts_with(&options.artifact_prefix) {
                continue;
            }
            let dest = staging.join(&artifact.name);
            for file in store.download(&artifact.name, &dest)? {
                if file.extension().is_some_and(|ext| ext == "json") {
                    reports.push(CoverageReport::from_file(&file)?);
                }
            }
        }
    }

    for shard in &options.shards {
        reports.push(CoverageReport::from_file(&ctx.resolve(shard))?);
    }
    Ok(reports)
}

pub async fn run(
    options: &CoverageOptions,
    ctx: &ActivityContext<'_>,
) -> Result<CoverageSummary, ActivityError> {
    let target = options.target.map(CoverageTarget::parse).transpose()?;

    let staging = tempfile::tempdir().map_err(|e| ActivityError::io(&std::env::temp_dir(), e))?;
    let shards = collect_shards(options, ctx, staging.path())?;
    let merged = CoverageReport::merge_all(&shards)?;

    let output = ctx.resolve(&options.output);
    merged.write(&output)?;
    let percent = merged.percent();
    info!(
        "Merged {} shards: {}/{} lines, {:.2}%",
        shards.len(),
        merged.covered_lines(),
        merged.num_statements(),
        percent
    );

    let store = options.badge.as_ref().map(|b| b.open(ctx)).transpose()?;
    let previous = match &store {
        Some(store) => store.load().await?.and_then(|badge| badge.percent()),
        None => None,
    };

    let check = match target {
        Some(target) => Some(target.check(percent, previous)?),
        None => None,
    };
    if let Some(TargetCheck::Met { target }) = check {
        info!("Coverage {:.2}% meets the target of {:.2}%", percent, target);
    }

    if let Some(name) = &options.artifact {
        ctx.upload(name, &[output.clone()])?;
    }

    if options.publish {
        match &store {
            Some(store) => {
                let badge = Badge::for_coverage(&options.label, percent);
                store.save(&badge).await?;
                info!("Published badge '{}' to {}", badge.message, store.location());
            }
            None => warn!("'publish' is set but no badge location was configured"),
        }
    }

    Ok(CoverageSummary {
        percent,
        previous,
        check,
        shards: shards.len(),
    })
}
