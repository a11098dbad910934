//! Install checks for built packages and binaries

use crate::activities::{find_files, single_candidate, ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

fn default_package_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_binary_dir() -> PathBuf {
    PathBuf::from("binary")
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("installed")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallPackageOptions {
    #[serde(default = "default_package_dir")]
    pub search_dir: PathBuf,

    /// Artifact downloaded into `search_dir` first
    #[serde(default)]
    pub artifact: Option<String>,

    /// Command run after installing (`[mytool, --version]`)
    #[serde(default)]
    pub smoke_test: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallBinaryOptions {
    #[serde(default = "default_binary_dir")]
    pub search_dir: PathBuf,

    #[serde(default)]
    pub artifact: Option<String>,

    /// Clean directory the archive is extracted into
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Command run from the install directory
    #[serde(default)]
    pub smoke_test: Vec<String>,
}

fn stage_artifact(
    ctx: &ActivityContext<'_>,
    artifact: Option<&str>,
    dir: &Path,
) -> Result<(), ActivityError> {
    if let Some(name) = artifact {
        ctx.download(name, dir)?;
    }
    Ok(())
}

async fn smoke_test(
    ctx: &ActivityContext<'_>,
    argv: &[String],
    cwd: Option<&Path>,
) -> Result<(), ActivityError> {
    let Some(command) = CommandDescriptor::from_argv(argv) else {
        return Ok(());
    };
    let command = match cwd {
        Some(dir) => command.current_dir(dir),
        None => command,
    };
    ctx.exec("Running smoke test", command).await?;
    Ok(())
}

pub async fn run_package(
    options: &InstallPackageOptions,
    ctx: &ActivityContext<'_>,
) -> Result<(), ActivityError> {
    let search_dir = ctx.resolve(&options.search_dir);
    stage_artifact(ctx, options.artifact.as_deref(), &search_dir)?;

    let wheels = find_files(&search_dir, |name| name.ends_with(".whl"))?;
    let wheel = single_candidate(".whl files", &search_dir, wheels)?;
    info!("Installing '{}'", wheel.display());

    ctx.exec(
        "Installing package",
        CommandDescriptor::new("pip")
            .arg("install")
            .arg(wheel.display().to_string()),
    )
    .await?;

    smoke_test(ctx, &options.smoke_test, None).await
}

fn extract_command(ctx: &ActivityContext<'_>, archive: &Path, dest: &Path) -> CommandDescriptor {
    if ctx.conventions.is_windows {
        CommandDescriptor::new("PowerShell")
            .arg("-NoProfile")
            .arg("-Command")
            .arg("Expand-Archive")
            .arg("-Path")
            .arg(archive.display().to_string())
            .arg("-DestinationPath")
            .arg(dest.display().to_string())
    } else {
        CommandDescriptor::new("tar")
            .arg("-xzf")
            .arg(archive.display().to_string())
            .arg("-C")
            .arg(dest.display().to_string())
    }
}

pub async fn run_binary(
    options: &InstallBinaryOptions,
    ctx: &ActivityContext<'_>,
) -> Result<(), ActivityError> {
    let search_dir = ctx.resolve(&options.search_dir);
    stage_artifact(ctx, options.artifact.as_deref(), &search_dir)?;

    let extension = ctx.conventions.compressed_extension.clone();
    let archives = find_files(&search_dir, |name| name.ends_with(&extension))?;
    let archive = single_candidate("archives", &search_dir, archives)?;

    let install_dir = ctx.resolve(&options.install_dir);
    if install_dir.exists() {
        std::fs::remove_dir_all(&install_dir).map_err(|e| ActivityError::io(&install_dir, e))?;
    }
    std::fs::create_dir_all(&install_dir).map_err(|e| ActivityError::io(&install_dir, e))?;

    ctx.exec("Extracting archive", extract_command(ctx, &archive, &install_dir))
        .await?;

    smoke_test(ctx, &options.smoke_test, Some(&install_dir)).await
}
