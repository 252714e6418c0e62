//! Error taxonomy for registry building.
//!
//! Most of these are recovered close to where they happen (a missing stream
//! directory is filtered out, an odd identifiers header is logged). Only
//! `NoRawRoots` and `InvalidTimeWindow` are meant to reach the caller of a
//! project build.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for the registry core.
pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError
{
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid timestamp key '{0}' (expected YYYY-MM-DD HH_MM_SS)")]
    InvalidTimestampKey(String),

    #[error("invalid time window: start '{start}' is after end '{end}'")]
    InvalidTimeWindow
    {
        start: String,
        end: String,
    },

    #[error("ambiguous identifiers file {}: {reason}", path.display())]
    AmbiguousIdentifierFile
    {
        path: PathBuf,
        reason: String,
    },

    #[error("failed to build registry for user {user_id}: {reason}")]
    UserBuildFailure
    {
        user_id: String,
        reason: String,
    },

    #[error("none of the raw data roots exist: {0:?}")]
    NoRawRoots(Vec<PathBuf>),

    #[error("I/O error at {}: {source}", path.display())]
    Io
    {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid ignore pattern: {0}")]
    Pattern(#[from] globset::Error),
}

impl RegistryError
{
    /// Wrap an `io::Error` with the path that produced it.
    pub fn io(
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self
    {
        Self::Io { path: path.into(), source }
    }
}
