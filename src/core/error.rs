//! Error taxonomy for a sync run.
//!
//! Only `SetupError` and `ScanError` abort a run. Warnings and action errors
//! are collected and reported once the phase that produced them completes.

use crate::core::planner::ActionKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before any scanning starts
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("source path '{0}' does not exist")]
    SourceMissing(PathBuf),

    #[error("source path '{0}' is not a directory")]
    SourceNotDirectory(PathBuf),

    #[error("target path '{0}' exists but is not a directory")]
    TargetNotDirectory(PathBuf),

    #[error("source and target resolve to the same path '{0}'")]
    SamePath(PathBuf),

    #[error("target path '{target}' cannot be inside the source path '{source_root}'")]
    TargetInsideSource { source_root: PathBuf, target: PathBuf },

    #[error("source path '{source_root}' cannot be inside the target path '{target}'")]
    SourceInsideTarget { source_root: PathBuf, target: PathBuf },

    #[error("could not inspect '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid ignore pattern '{pattern}': {message}")]
    IgnorePattern { pattern: String, message: String },
}

/// Fatal scan failures
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root '{0}' does not exist")]
    RootNotFound(PathBuf),

    #[error("scan root '{0}' is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("could not read scan root '{path}': {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan worker failed: {0}")]
    Worker(String),
}

/// A node that could not be visited; it is left out of the mapping
#[derive(Debug, Clone, Error)]
#[error("cannot access '{}': {message}", path.display())]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
}

/// A digest failure during an inconclusive comparison, resolved as an update
#[derive(Debug, Clone, Error)]
#[error("could not compare '{relative_path}', assuming it changed: {message}")]
pub struct ComparisonWarning {
    pub relative_path: String,
    pub message: String,
}

/// Failure applying one action
#[derive(Debug, Error)]
#[error("{kind} {relative_path}: failed to {operation}: {source}")]
pub struct ActionError {
    pub kind: ActionKind,
    pub relative_path: String,
    pub operation: &'static str,
    #[source]
    pub source: io::Error,
}

impl ActionError {
    pub fn new(kind: ActionKind, relative_path: &str, operation: &'static str, source: io::Error) -> Self {
        Self {
            kind,
            relative_path: relative_path.to_string(),
            operation,
            source,
        }
    }
}

/// Anything that stops a run before the apply phase
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("error scanning source directory: {0}")]
    SourceScan(#[source] ScanError),

    #[error("error scanning target directory: {0}")]
    TargetScan(#[source] ScanError),

    #[error("planning task failed: {0}")]
    Planning(String),
}
