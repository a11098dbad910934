//! Core domain models
//!
//! Run context, shell conventions, command descriptors, artifacts and the
//! pipeline model built from YAML.

pub mod artifact;
pub mod command;
pub mod condition;
pub mod config;
pub mod context;
pub mod environment;
pub mod files;
pub mod pipeline;
pub mod state;

pub use artifact::{Artifact, ArtifactError, ArtifactStore};
pub use command::CommandDescriptor;
pub use context::RunContext;
pub use environment::ShellConventions;
pub use pipeline::*;
pub use state::*;
