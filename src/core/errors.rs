//! SCK-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Top-level error type for the health-check listener.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("[SCK-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SCK-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SCK-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SCK-2001] rpc transport failure talking to {endpoint}: {details}")]
    RpcTransport { endpoint: String, details: String },

    #[error("[SCK-2002] rpc fault {code}: {message}")]
    RpcFault { code: i64, message: String },

    #[error("[SCK-2003] rpc response decode failure: {details}")]
    RpcDecode { details: String },

    #[error("[SCK-3001] event wait interrupted by shutdown")]
    Interrupted,

    #[error("[SCK-3002] event channel closed")]
    ChannelClosed,

    #[error("[SCK-3003] event protocol violation: {details}")]
    Protocol { details: String },

    #[error("[SCK-4001] invalid check configuration for {check}: {details}")]
    InvalidCheckConfig {
        check: &'static str,
        details: String,
    },

    #[error("[SCK-4002] unknown check type: {kind}")]
    UnknownCheck { kind: String },

    #[error("[SCK-4003] check {check} could not evaluate {process}: {details}")]
    CheckFailed {
        check: String,
        process: String,
        details: String,
    },

    #[error("[SCK-9001] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SCK-9900] runtime failure: {details}")]
    Runtime { details: String },
}

impl CheckError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SCK-1001",
            Self::MissingConfig { .. } => "SCK-1002",
            Self::ConfigParse { .. } => "SCK-1003",
            Self::RpcTransport { .. } => "SCK-2001",
            Self::RpcFault { .. } => "SCK-2002",
            Self::RpcDecode { .. } => "SCK-2003",
            Self::Interrupted => "SCK-3001",
            Self::ChannelClosed => "SCK-3002",
            Self::Protocol { .. } => "SCK-3003",
            Self::InvalidCheckConfig { .. } => "SCK-4001",
            Self::UnknownCheck { .. } => "SCK-4002",
            Self::CheckFailed { .. } => "SCK-4003",
            Self::Io { .. } => "SCK-9001",
            Self::Runtime { .. } => "SCK-9900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::RpcTransport { .. }
                | Self::CheckFailed { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for check evaluation failures.
    #[must_use]
    pub fn check_failed(
        check: impl Into<String>,
        process: impl Into<String>,
        details: impl ToString,
    ) -> Self {
        Self::CheckFailed {
            check: check.into(),
            process: process.into(),
            details: details.to_string(),
        }
    }
}

impl From<toml::de::Error> for CheckError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
