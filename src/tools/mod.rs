//! Command-line utilities
//!
//! Each tool is a library function returning its result; printing and exit
//! codes are handled by the CLI layer.

pub mod commit_emojis;
pub mod output2markdown;
pub mod show_scripts;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the command-line utilities
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("The environment variable '{0}' is not defined")]
    MissingEnvVar(String),

    #[error("The directory '{0}' does not exist")]
    MissingDir(PathBuf),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid emoji data: {0}")]
    EmojiData(String),

    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("{0}")]
    Markers(String),

    #[error(transparent)]
    Process(#[from] crate::process::ProcessError),
}

impl ToolError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
