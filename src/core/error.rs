//! Error types for the voxel GI pipeline
//!
//! Capacity exhaustion and degenerate geometry are not errors: they degrade
//! the frame and raise saturation flags instead. Only configuration problems,
//! I/O and rejected dispatches surface here.

use thiserror::Error;

/// Main error type for the pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Dispatch '{label}' rejected: {groups} groups exceeds limit of {limit}")]
    DispatchRejected {
        label: &'static str,
        groups: u32,
        limit: u32,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
