//! Typed errors for configuration and the settings cache.
//!
//! Git failures live in [`crate::git::GitError`]; everything else flows through
//! `anyhow` with context attached at the call site.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems, reported before any work starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0} must be set in the config file")]
    MissingKey(&'static str),

    #[error("server alias '{alias}' is invalid: {reason}")]
    InvalidServer { alias: String, reason: String },

    #[error("could not determine the user's config directory")]
    NoConfigDir,
}

/// Settings cache failures. Distinct from a missing value, which is `Ok(None)`.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to create cache directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings store unavailable: {0}")]
    Database(#[from] rusqlite::Error),
}
