use std::io;

use thiserror::Error;

use crate::ports::Capability;

pub type Result<T> = std::result::Result<T, WardriveError>;

#[derive(Debug, Error)]
pub enum WardriveError {
    /// A required capability was refused; acquisition cannot proceed.
    #[error("required capabilities denied: {}", format_capabilities(.missing))]
    CapabilityDenied { missing: Vec<Capability> },

    #[error("address lookup failed: {0}")]
    LabelResolutionFailed(#[from] LabelError),

    #[error("observation store write failed: {0}")]
    StoreWriteFailed(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{source_name} failed: {reason}")]
    Source {
        source_name: &'static str,
        reason: String,
    },

    #[error("acquisition pipeline is no longer running")]
    PipelineClosed,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("row encoding: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Another process holds the store's lock file.
    #[error("{path} is in use by process {pid}")]
    InUse { path: String, pid: u32 },
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("no place known near this position")]
    NotFound,

    #[error("malformed label data: {0}")]
    Malformed(String),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn format_capabilities(caps: &[Capability]) -> String {
    caps.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
