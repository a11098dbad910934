//! Packaging: version stamp, package README preparation and `python -m build`

use crate::activities::version::{self, UpdateVersionOptions};
use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use crate::core::files::RemoveOnDrop;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const EXCLUDE_BEGIN: &str = r"<!--\s*BEGIN:\s*Exclude Package\s*-->";
const EXCLUDE_END: &str = r"<!--\s*END:\s*Exclude Package\s*-->";

/// `project.readme` values with this prefix are generated from README.md
const DYNAMIC_README_PREFIX: &str = "dynamic_";

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_artifact() -> String {
    "package".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageOptions {
    /// Directory holding `pyproject.toml`
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Stamp the version into this file before building
    #[serde(default)]
    pub version_file: Option<PathBuf>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub build_args: Vec<String>,

    #[serde(default = "default_artifact")]
    pub artifact: String,
}

/// Remove every `BEGIN: Exclude Package` ... `END: Exclude Package` region
pub fn strip_excluded_regions(content: &str) -> Result<String, ActivityError> {
    let begin = Regex::new(EXCLUDE_BEGIN).map_err(|e| ActivityError::Invalid(e.to_string()))?;
    let end = Regex::new(EXCLUDE_END).map_err(|e| ActivityError::Invalid(e.to_string()))?;

    let mut result = String::with_capacity(content.len());
    let mut position = 0;

    while let Some(begin_match) = begin.find_at(content, position) {
        result.push_str(&content[position..begin_match.start()]);
        let end_match = end.find_at(content, begin_match.end()).ok_or_else(|| {
            ActivityError::Invalid("Missing end tag for exclude package".to_string())
        })?;
        position = end_match.end();
    }
    result.push_str(&content[position..]);

    Ok(result)
}

/// `project.readme` from `pyproject.toml`, when it is a plain file name
pub fn readme_name(pyproject: &str) -> Result<Option<String>, ActivityError> {
    let value: toml::Value = pyproject
        .parse()
        .map_err(|e| ActivityError::Invalid(format!("Invalid pyproject.toml: {}", e)))?;
    Ok(value
        .get("project")
        .and_then(|project| project.get("readme"))
        .and_then(|readme| readme.as_str())
        .map(str::to_string))
}

/// Write the dynamic README if `pyproject.toml` asks for one; the returned
/// guard deletes it again
fn prepare_readme(source_root: &Path) -> Result<Option<RemoveOnDrop>, ActivityError> {
    let pyproject = source_root.join("pyproject.toml");
    let content =
        std::fs::read_to_string(&pyproject).map_err(|e| ActivityError::io(&pyproject, e))?;

    let Some(readme) = readme_name(&content)? else {
        return Ok(None);
    };
    if !readme.starts_with(DYNAMIC_README_PREFIX) {
        return Ok(None);
    }

    let original = source_root.join("README.md");
    let readme_content =
        std::fs::read_to_string(&original).map_err(|e| ActivityError::io(&original, e))?;
    let stripped = strip_excluded_regions(&readme_content)?;

    let dynamic = source_root.join(&readme);
    std::fs::write(&dynamic, stripped).map_err(|e| ActivityError::io(&dynamic, e))?;
    debug!("Wrote package README '{}'", dynamic.display());

    Ok(Some(RemoveOnDrop::new(dynamic)))
}

pub async fn run(options: &PackageOptions, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
    let source_root = ctx.resolve(&options.source_root);

    if let Some(version_file) = &options.version_file {
        let stamp = UpdateVersionOptions {
            version_file: source_root.join(version_file),
            version: options.version.clone(),
            pattern: version::DEFAULT_VERSION_PATTERN.to_string(),
            replacement: version::DEFAULT_VERSION_REPLACEMENT.to_string(),
        };
        version::run(&stamp, ctx).await?;
    }

    let _readme = prepare_readme(&source_root)?;

    let command = CommandDescriptor::new("python")
        .args(["-m", "build"])
        .args(options.build_args.iter().cloned())
        .current_dir(&source_root);
    ctx.exec("Packaging", command).await?;

    let dist = source_root.join("dist");
    let files = crate::activities::find_files(&dist, |_| true)?;
    if files.is_empty() {
        return Err(ActivityError::Invalid(format!(
            "The build produced no files in '{}'",
            dist.display()
        )));
    }
    info!("Built {} distribution files", files.len());
    ctx.upload(&options.artifact, &[dist])?;

    Ok(())
}
