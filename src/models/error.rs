//! Error types for organelle-batch.
//!
//! Taxonomy:
//! - Fatal before any item runs: configuration, dataset load, setup step
//! - Per-item: a mandatory step failed (`StepFailure`)
//! - Fatal mid-run: the checkpoint could not be written

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for organelle-batch.
#[derive(Debug, Error)]
pub enum BatchError {
    // ═══════════════════════════════════════════════════════════════════
    // Startup failures: nothing has been processed yet
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Failed to load dataset {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Setup step failed: {0}")]
    Setup(#[source] ExecError),

    #[error(
        "Start index {start} is past checkpoint {checkpoint}; items {checkpoint}..{start} were never attempted"
    )]
    SkipsItems { checkpoint: usize, start: usize },

    // ═══════════════════════════════════════════════════════════════════
    // Item failures
    // ═══════════════════════════════════════════════════════════════════

    #[error(transparent)]
    Step(#[from] StepFailure),

    // ═══════════════════════════════════════════════════════════════════
    // Durable state
    // ═══════════════════════════════════════════════════════════════════

    #[error("Checkpoint IO error: {context}")]
    CheckpointIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single external command.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}", display_code(.code))]
    Exit { program: String, code: Option<i32> },

    #[error("`{program}` timed out after {after:?}")]
    TimedOut {
        program: String,
        after: std::time::Duration,
    },

    #[error("lost contact with `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

impl ExecError {
    /// Exit code of the child, if it ran to completion.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => *code,
            _ => None,
        }
    }
}

/// A mandatory step of an item's pipeline failed.
#[derive(Debug, Error)]
#[error("item {item_id}: step '{step}' failed: {source}")]
pub struct StepFailure {
    pub item_id: String,
    pub step: String,
    #[source]
    pub source: ExecError,
}

impl BatchError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a checkpoint IO error with context.
    pub fn checkpoint_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::CheckpointIo {
            context: context.into(),
            source,
        }
    }

    pub fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for organelle-batch.
pub type Result<T> = std::result::Result<T, BatchError>;
