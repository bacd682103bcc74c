//! Centralized error types for mailfwd.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailfwd library.
///
/// `Fetch` and `Parse` are fatal to an invocation. The others are contained
/// by the forwarder and only surface through logs and the returned outcome.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The source message could not be read from the inbox location.
    #[error("Failed to fetch message '{message_id}': {source}")]
    Fetch {
        message_id: String,
        source: StoreError,
    },

    /// The raw bytes do not contain a usable header block.
    #[error("Malformed message: {0}")]
    Parse(String),

    /// One attachment could not be persisted or linked.
    #[error("Failed to relocate attachment '{filename}': {source}")]
    Relocate {
        filename: String,
        source: StoreError,
    },

    /// The relay rejected the message or was unreachable.
    #[error("Send failed: {0}")]
    Send(#[from] RelayError),

    /// Moving the source object after the send decision failed.
    #[error("Failed to move message '{message_id}' to '{destination}': {source}")]
    Archive {
        message_id: String,
        destination: String,
        source: StoreError,
    },

    /// Startup configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The trigger payload did not carry a message identifier.
    #[error("Invalid trigger event: {0}")]
    Event(String),
}

/// Failure reported by a blob store operation.
#[derive(Error, Debug)]
#[error("{op} s3://{bucket}/{key}: {reason}")]
pub struct StoreError {
    /// Operation name (`get`, `put`, `copy`, `delete`, `presign`).
    pub op: &'static str,
    pub bucket: String,
    pub key: String,
    pub reason: String,
}

impl StoreError {
    /// Build a `StoreError` for `op` on `bucket/key`.
    pub fn new(
        op: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self {
            op,
            bucket: bucket.into(),
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure reason returned by a mail relay.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct RelayError(pub String);

/// Configuration problems detected at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required value is empty.
    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    /// A value is present but unusable.
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The configuration file could not be read or parsed.
    #[error("Cannot load config '{path}': {reason}")]
    File { path: PathBuf, reason: String },
}

/// Convenience alias for `Result<T, ForwardError>`.
pub type Result<T> = std::result::Result<T, ForwardError>;
