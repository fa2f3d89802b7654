//! Error taxonomy shared by the collaborators and the evaluation core.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable configuration. Always raised before any I/O happens.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<toml::de::Error>,
    },

    #[error("failed to load env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("unknown simulation scenario '{0}'")]
    UnknownScenario(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A data source could not be reached or answered with garbage.
#[derive(Error, Debug, Clone)]
pub enum ConnectivityError {
    #[error("{source_name}: timed out")]
    Timeout { source_name: &'static str },

    #[error("{source_name}: transport error: {message}")]
    Transport { source_name: &'static str, message: String },

    #[error("{source_name}: http {status}: {message}")]
    Http {
        source_name: &'static str,
        status: u16,
        message: String,
    },

    #[error("{source_name}: unexpected response: {message}")]
    Protocol { source_name: &'static str, message: String },

    #[error("{source_name}: not configured")]
    NotConfigured { source_name: &'static str },
}

impl ConnectivityError {
    /// Whether a bounded retry might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectivityError::Timeout { .. } | ConnectivityError::Transport { .. } => true,
            ConnectivityError::Http { status, .. } => *status == 429 || *status >= 500,
            ConnectivityError::Protocol { .. } | ConnectivityError::NotConfigured { .. } => false,
        }
    }
}

/// A reading that arrived but cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataIntegrityError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} is negative ({value})")]
    Negative { field: &'static str, value: f64 },

    #[error("serial number is empty")]
    EmptySerial,
}

/// The state store could not be opened, locked, or written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("state store {path} is locked by another run")]
    Locked { path: PathBuf },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("database connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("applying database migrations failed: {0}")]
    Migration(String),

    #[error("database error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),
}

/// Top-level failure of a command; decides the process exit code.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::Persistence(_) | AppError::Other(_) => 1,
        }
    }
}
