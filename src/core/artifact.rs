//! Named artifacts exchanged between jobs
//!
//! An artifact is written once by the job that produced it and can be read
//! by any later job of the same run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File holding the artifact metadata inside its directory
const MANIFEST_NAME: &str = ".artifact.json";

/// Errors raised by the artifact store
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact '{0}' already exists; artifacts are write-once")]
    AlreadyExists(String),

    #[error("Artifact '{0}' does not exist")]
    Missing(String),

    #[error("Invalid artifact name '{0}'")]
    InvalidName(String),

    #[error("Artifact '{name}': '{path}' does not exist")]
    MissingInput { name: String, path: PathBuf },

    #[error("Artifact '{name}': more than one input would be stored as '{path}'")]
    DuplicateFile { name: String, path: PathBuf },

    #[error("Artifact '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata describing an uploaded artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name, unique within a run
    pub name: String,

    /// Id of the job that produced it
    pub producer: String,

    /// Files stored in the artifact, relative to its directory
    pub files: Vec<PathBuf>,
}

/// Directory-backed artifact store for one run
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Upload files (or directory trees) under `name`.
    ///
    /// The artifact directory is created atomically, so two jobs racing on
    /// the same name cannot both succeed.
    pub fn upload(
        &self,
        name: &str,
        producer: &str,
        paths: &[PathBuf],
    ) -> Result<Artifact, ArtifactError> {
        validate_name(name)?;

        for path in paths {
            if !path.exists() {
                return Err(ArtifactError::MissingInput {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }

        // Resolve every destination first so nothing is written on a clash
        let mut planned = Vec::new();
        for path in paths {
            if path.is_dir() {
                plan_tree(path, Path::new(""), &mut planned)?;
            } else if let Some(file_name) = path.file_name() {
                planned.push((path.clone(), PathBuf::from(file_name)));
            }
        }
        let mut seen = HashSet::new();
        for (_, relative) in &planned {
            if !seen.insert(relative) {
                return Err(ArtifactError::DuplicateFile {
                    name: name.to_string(),
                    path: relative.clone(),
                });
            }
        }

        let dir = self.root.join(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let mut files = Vec::with_capacity(planned.len());
        for (source, relative) in planned {
            let target = dir.join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&source, &target)?;
            files.push(relative);
        }
        files.sort();

        let artifact = Artifact {
            name: name.to_string(),
            producer: producer.to_string(),
            files,
        };
        let manifest = serde_json::to_string_pretty(&artifact).map_err(|e| {
            ArtifactError::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        fs::write(dir.join(MANIFEST_NAME), manifest)?;

        info!(
            "Uploaded artifact '{}' ({} files) from {}",
            name,
            artifact.files.len(),
            producer
        );
        Ok(artifact)
    }

    /// Read the metadata of an artifact
    pub fn get(&self, name: &str) -> Result<Artifact, ArtifactError> {
        validate_name(name)?;
        let manifest = self.root.join(name).join(MANIFEST_NAME);
        if !manifest.is_file() {
            return Err(ArtifactError::Missing(name.to_string()));
        }

        let content = fs::read_to_string(&manifest)?;
        serde_json::from_str(&content).map_err(|e| ArtifactError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// List all artifacts, sorted by name
    pub fn list(&self) -> Result<Vec<Artifact>, ArtifactError> {
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_NAME).is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                artifacts.push(self.get(&name)?);
            }
        }
        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    /// Copy the files of an artifact into `dest`; returns the copied paths
    pub fn download(&self, name: &str, dest: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        let artifact = self.get(name)?;
        let source = self.root.join(name);
        fs::create_dir_all(dest)?;

        let mut copied = Vec::new();
        for file in &artifact.files {
            let from = source.join(file);
            if !from.is_file() {
                return Err(ArtifactError::Malformed {
                    name: name.to_string(),
                    reason: format!("'{}' listed but not stored", file.display()),
                });
            }
            let to = dest.join(file);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&from, &to)?;
            copied.push(to);
        }

        debug!("Downloaded artifact '{}' into {}", name, dest.display());
        Ok(copied)
    }

    /// Copy every artifact into `dest/<name>/`
    pub fn download_all(&self, dest: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        let mut copied = Vec::new();
        for artifact in self.list()? {
            copied.extend(self.download(&artifact.name, &dest.join(&artifact.name))?);
        }
        Ok(copied)
    }
}

fn validate_name(name: &str) -> Result<(), ArtifactError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ArtifactError::InvalidName(name.to_string()))
    }
}

/// Files below `root`, paired with their path relative to `root`
fn plan_tree(
    root: &Path,
    relative: &Path,
    planned: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<(), ArtifactError> {
    for entry in fs::read_dir(root.join(relative))? {
        let entry = entry?;
        let relative_path = relative.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            plan_tree(root, &relative_path, planned)?;
        } else {
            planned.push((entry.path(), relative_path));
        }
    }
    Ok(())
}
