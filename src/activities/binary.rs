//! Frozen binary build and archive

use crate::activities::{single_candidate, ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use crate::core::files::{prune_empty_dirs, walk_dirs};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Directory name produced by `build_exe` (`exe.linux-x86_64-3.12`)
const EXE_DIR_PATTERN: &str = r"^exe\..+?-\d+\.\d+$";

fn default_output_dir() -> PathBuf {
    PathBuf::from("binary")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryBuildOptions {
    /// Build script invoked as `python <build_file> build_exe`
    pub build_file: PathBuf,

    /// Where the build output and archive end up
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Artifact name; defaults to `binary-<os>`
    #[serde(default)]
    pub artifact: Option<String>,
}

/// The single `exe.<platform>-<major>.<minor>` directory below `root`
pub fn find_exe_dir(root: &Path) -> Result<PathBuf, ActivityError> {
    let regex = Regex::new(EXE_DIR_PATTERN).map_err(|e| ActivityError::Invalid(e.to_string()))?;
    let candidates: Vec<PathBuf> = walk_dirs(root)
        .map_err(|e| ActivityError::io(root, e))?
        .into_iter()
        .filter(|dir| {
            dir.file_name()
                .map(|name| regex.is_match(&name.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    single_candidate("binary directories", root, candidates)
}

fn archive_command(ctx: &ActivityContext<'_>, source: &Path, archive: &Path) -> CommandDescriptor {
    if ctx.conventions.is_windows {
        CommandDescriptor::new("PowerShell")
            .arg("-NoProfile")
            .arg("-Command")
            .arg("Compress-Archive")
            .arg("-Path")
            .arg(format!("{}\\*", source.display()))
            .arg("-DestinationPath")
            .arg(archive.display().to_string())
            .current_dir(source)
    } else {
        CommandDescriptor::new("tar")
            .arg("--create")
            .arg(format!("--file={}", archive.display()))
            .arg("--gzip")
            .arg("--verbose")
            .arg(".")
            .current_dir(source)
    }
}

/// Archive file name for an exe directory
pub fn archive_name(ctx: &ActivityContext<'_>, exe_dir: &Path) -> String {
    let stem = exe_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "binary".to_string());
    if ctx.conventions.is_windows {
        format!("{}{}", stem, ctx.conventions.compressed_extension)
    } else {
        format!("{}.tar{}", stem, ctx.conventions.compressed_extension)
    }
}

pub async fn run(options: &BinaryBuildOptions, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
    let build_file = ctx.resolve(&options.build_file);
    let build_root = build_file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.workspace.clone());
    let file_name = build_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| ActivityError::Invalid("'build_file' has no file name".to_string()))?;

    let command = CommandDescriptor::new("python")
        .arg(file_name)
        .arg("build_exe")
        .current_dir(&build_root);
    ctx.exec("Building executable", command).await?;

    let build_dir = build_root.join("build");
    if !build_dir.is_dir() {
        return Err(ActivityError::Invalid(format!(
            "The build did not create '{}'",
            build_dir.display()
        )));
    }

    let removed = prune_empty_dirs(&build_dir).map_err(|e| ActivityError::io(&build_dir, e))?;
    info!("Removed {} empty directories", removed);

    let output_dir = ctx.resolve(&options.output_dir);
    if output_dir.exists() {
        std::fs::remove_dir_all(&output_dir).map_err(|e| ActivityError::io(&output_dir, e))?;
    }
    if let Some(parent) = output_dir.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ActivityError::io(parent, e))?;
    }
    std::fs::rename(&build_dir, &output_dir).map_err(|e| ActivityError::io(&build_dir, e))?;

    let exe_dir = find_exe_dir(&output_dir)?;
    let archive = output_dir.join(archive_name(ctx, &exe_dir));
    ctx.exec("Creating archive", archive_command(ctx, &exe_dir, &archive))
        .await?;

    let artifact = options
        .artifact
        .clone()
        .unwrap_or_else(|| format!("binary-{}", ctx.run.os));
    ctx.upload(&artifact, &[archive])?;

    Ok(())
}
