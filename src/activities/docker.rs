//! Container image build, export and push

use crate::activities::{ActivityContext, ActivityError};
use crate::core::command::CommandDescriptor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_tag() -> String {
    "latest".to_string()
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("docker")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerImageOptions {
    pub image: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    #[serde(default = "default_context")]
    pub context: PathBuf,

    /// `KEY=VALUE` pairs passed as `--build-arg`
    #[serde(default)]
    pub build_args: Vec<String>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Registry to tag and push to (`ghcr.io/owner`)
    #[serde(default)]
    pub registry: Option<String>,
}

impl DockerImageOptions {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Image name usable as a file or artifact name
    pub fn file_stem(&self) -> String {
        self.image
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect()
    }
}

fn compress_command(ctx: &ActivityContext<'_>, tarball: &Path) -> (CommandDescriptor, PathBuf) {
    let archive = PathBuf::from(format!(
        "{}{}",
        tarball.display(),
        ctx.conventions.compressed_extension
    ));

    let command = if ctx.conventions.is_windows {
        CommandDescriptor::new("PowerShell")
            .arg("-NoProfile")
            .arg("-Command")
            .arg("Compress-Archive")
            .arg("-Path")
            .arg(tarball.display().to_string())
            .arg("-DestinationPath")
            .arg(archive.display().to_string())
    } else {
        CommandDescriptor::new("gzip")
            .arg("-f")
            .arg(tarball.display().to_string())
    };
    (command, archive)
}

pub async fn run(options: &DockerImageOptions, ctx: &ActivityContext<'_>) -> Result<(), ActivityError> {
    let reference = options.reference();

    let mut build = CommandDescriptor::new("docker").arg("build").arg("-t").arg(&reference);
    if let Some(dockerfile) = &options.dockerfile {
        build = build.arg("-f").arg(ctx.resolve(dockerfile).display().to_string());
    }
    for build_arg in &options.build_args {
        build = build.arg("--build-arg").arg(build_arg);
    }
    build = build.arg(ctx.resolve(&options.context).display().to_string());
    ctx.exec("Building image", build).await?;

    let output_dir = ctx.resolve(&options.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|e| ActivityError::io(&output_dir, e))?;
    let tarball = output_dir.join(format!("{}.tar", options.file_stem()));

    let save = CommandDescriptor::new("docker")
        .arg("save")
        .arg("-o")
        .arg(tarball.display().to_string())
        .arg(&reference);
    ctx.exec("Saving image", save).await?;

    let (compress, archive) = compress_command(ctx, &tarball);
    ctx.exec("Compressing image", compress).await?;
    ctx.upload(&format!("docker-{}", options.file_stem()), &[archive])?;

    if let Some(registry) = &options.registry {
        let remote = format!("{}/{}", registry.trim_end_matches('/'), reference);
        ctx.exec(
            "Tagging image",
            CommandDescriptor::new("docker").arg("tag").arg(&reference).arg(&remote),
        )
        .await?;
        ctx.exec(
            "Pushing image",
            CommandDescriptor::new("docker").arg("push").arg(&remote),
        )
        .await?;
    }

    Ok(())
}
