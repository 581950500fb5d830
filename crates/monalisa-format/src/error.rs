use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when reading or writing module descriptors.
#[derive(Debug, Error)]
pub enum Error {
    /// The descriptor file does not exist.
    #[error("descriptor not found: {}", .0.display())]
    DescriptorNotFound(PathBuf),

    /// A required descriptor field is absent or empty.
    #[error("descriptor missing required field: {0}")]
    MissingField(String),

    /// The descriptor is syntactically or structurally invalid.
    #[error("invalid descriptor format: {0}")]
    InvalidDescriptor(String),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parsing or serialization error.
    #[error("toml error: {0}")]
    TomlError(String),
}

/// Result type for monalisa-format operations.
pub type Result<T> = std::result::Result<T, Error>;
