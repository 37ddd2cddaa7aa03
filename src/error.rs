//! Error types for the stego worker.

use uuid::Uuid;

/// Top-level error type for the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised synchronously while accepting a job, before any job state exists.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("No cover file uploaded")]
    MissingArtifact,

    #[error("Invalid command type: {0}")]
    UnknownKind(String),

    #[error("Invalid params: {0}")]
    InvalidParams(#[from] serde_json::Error),

    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),
}

/// Job store errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} already reached terminal state {status}")]
    AlreadyTerminal { id: Uuid, status: String },
}

/// External process errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process output stream failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result artifact lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("File not found")]
    NotFound,
}

/// Result type alias for the worker.
pub type Result<T> = std::result::Result<T, Error>;
