//! Heartbeat-file freshness check.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use super::{Check, parse_options};
use crate::core::errors::{CheckError, Result};
use crate::heartbeat;
use crate::logger::Logger;
use crate::rpc::ProcessInfo;

pub const KIND: &str = "file";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCheckConfig {
    /// Seconds without a heartbeat after which the process counts as dead.
    pub timeout: u64,
    /// Treat an unreadable heartbeat file as a failed check instead of no verdict.
    #[serde(default)]
    pub fail_on_error: bool,
    /// Path template; `{group}`, `{name}` and `{pid}` are substituted.
    #[serde(default)]
    pub file: Option<String>,
}

/// Fails when the process's heartbeat file has not changed within the timeout.
#[derive(Debug)]
pub struct FileCheck {
    config: FileCheckConfig,
    log: Logger,
}

impl FileCheck {
    pub fn new(config: FileCheckConfig, log: Logger) -> Result<Self> {
        if config.timeout == 0 {
            return Err(CheckError::InvalidCheckConfig {
                check: KIND,
                details: "timeout must be at least one second".to_string(),
            });
        }
        Ok(Self { config, log })
    }

    pub fn from_options(options: &toml::Table, log: Logger) -> Result<Self> {
        Self::new(parse_options(KIND, options)?, log)
    }

    /// Heartbeat location for `process`.
    #[must_use]
    pub fn path_for(&self, process: &ProcessInfo) -> PathBuf {
        self.config.file.as_ref().map_or_else(
            || heartbeat::notification_path(&process.group, &process.name, process.pid),
            |template| {
                PathBuf::from(
                    template
                        .replace("{group}", &process.group)
                        .replace("{name}", &process.name)
                        .replace("{pid}", &process.pid.to_string()),
                )
            },
        )
    }

    fn evaluate_at(&self, process: &ProcessInfo, now: SystemTime) -> Result<bool> {
        let path = self.path_for(process);
        let changed = match last_change(&path) {
            Ok(changed) => changed,
            Err(err) if self.config.fail_on_error => {
                self.log.log(format_args!(
                    "Heartbeat file {} unreadable for process {}: {err}",
                    path.display(),
                    process.name
                ));
                return Ok(false);
            }
            Err(err) => return Err(CheckError::check_failed(KIND, &process.name, err)),
        };

        let timeout = Duration::from_secs(self.config.timeout);
        let age = now.duration_since(changed).unwrap_or(Duration::ZERO);
        if age >= timeout {
            self.log.log(format_args!(
                "Heartbeat file {} for process {} unchanged for {}s (timeout {}s)",
                path.display(),
                process.name,
                age.as_secs(),
                timeout.as_secs()
            ));
            return Ok(false);
        }
        Ok(true)
    }
}

/// Inode change time; `notify` only touches permission bits, so mtime never moves.
fn last_change(path: &std::path::Path) -> std::io::Result<SystemTime> {
    let meta = std::fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let secs = u64::try_from(meta.ctime()).unwrap_or_default();
        let nanos = u32::try_from(meta.ctime_nsec()).unwrap_or_default();
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
    #[cfg(not(unix))]
    {
        let _ = UNIX_EPOCH;
        meta.modified()
    }
}

impl Check for FileCheck {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, process: &ProcessInfo) -> Result<bool> {
        self.evaluate_at(process, SystemTime::now())
    }
}
