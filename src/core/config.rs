//! Runner configuration loaded from TOML or assembled by the CLI.
//!
//! ```toml
//! name = "web_check"
//! group = "web"
//! max_workers = 16
//!
//! [env]
//! SUPERVISOR_SERVER_URL = "unix:///var/run/supervisor.sock"
//!
//! [[checks]]
//! type = "tcp"
//! port = 'web_(\d+)'
//! timeout = 5
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::{CheckError, Result};

/// Default and maximum simultaneous restart workers per tick.
pub const DEFAULT_MAX_WORKERS: usize = 16;
/// Default per-call XML-RPC timeout, in seconds.
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

/// One configured check: its type id plus an opaque options table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CheckSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: toml::Table,
}

impl CheckSpec {
    #[must_use]
    pub fn new(kind: impl Into<String>, options: toml::Table) -> Self {
        Self {
            kind: kind.into(),
            options,
        }
    }
}

/// Which processes a runner watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Group(String),
    /// A single process by name; its group is not consulted.
    Process(String),
}

impl Target {
    #[must_use]
    pub fn matches(&self, group: &str, name: &str) -> bool {
        match self {
            Self::Group(wanted) => wanted == group,
            Self::Process(wanted) => wanted == name,
        }
    }

    /// Human label used in log lines.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Group(group) => format!("{group} process group"),
            Self::Process(name) => format!("{name} process"),
        }
    }
}

/// Full runner configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Name stamped on every log record.
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Takes precedence over `group` when both are set.
    #[serde(default)]
    pub process_name: Option<String>,
    /// Lowers the worker cap; never raises it above [`DEFAULT_MAX_WORKERS`].
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Seconds allowed for each XML-RPC round trip.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: u64,
    /// Overrides the process environment when building the RPC client.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

const fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

const fn default_rpc_timeout() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

impl Config {
    /// Minimal config watching `group` with the given checks.
    #[must_use]
    pub fn for_group(name: impl Into<String>, group: impl Into<String>, checks: Vec<CheckSpec>) -> Self {
        Self {
            name: name.into(),
            group: Some(group.into()),
            process_name: None,
            max_workers: DEFAULT_MAX_WORKERS,
            rpc_timeout: DEFAULT_RPC_TIMEOUT_SECS,
            env: None,
            checks,
        }
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CheckError::MissingConfig {
                    path: path.to_path_buf(),
                }
            } else {
                CheckError::io(path, e)
            }
        })?;
        Self::from_toml(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        self.target()?;
        if self.checks.is_empty() {
            return Err(invalid("at least one [[checks]] entry is required"));
        }
        if self.checks.iter().any(|c| c.kind.trim().is_empty()) {
            return Err(invalid("every check needs a non-empty type"));
        }
        if !(1..=DEFAULT_MAX_WORKERS).contains(&self.max_workers) {
            return Err(invalid(&format!(
                "max_workers must be within 1..={DEFAULT_MAX_WORKERS}, got {}",
                self.max_workers
            )));
        }
        if self.rpc_timeout == 0 {
            return Err(invalid("rpc_timeout must be at least one second"));
        }
        Ok(())
    }

    /// Resolve the watch target.
    pub fn target(&self) -> Result<Target> {
        match (&self.process_name, &self.group) {
            (Some(name), _) if !name.is_empty() => Ok(Target::Process(name.clone())),
            (_, Some(group)) if !group.is_empty() => Ok(Target::Group(group.clone())),
            _ => Err(invalid("either group or process_name must be set")),
        }
    }

    /// Environment for the RPC client: the override if configured, else the
    /// process environment.
    #[must_use]
    pub fn environment(&self) -> HashMap<String, String> {
        self.env
            .clone()
            .unwrap_or_else(|| std::env::vars().collect())
    }

    /// Compact JSON rendering of the check list for the startup log line.
    #[must_use]
    pub fn checks_summary(&self) -> String {
        serde_json::to_string(&self.checks).unwrap_or_else(|_| format!("{:?}", self.checks))
    }
}

fn invalid(details: &str) -> CheckError {
    CheckError::InvalidConfig {
        details: details.to_string(),
    }
}
