//! Resident memory ceiling check, read from `/proc/<pid>/status`.

use std::path::PathBuf;

use serde::Deserialize;

use super::{Check, Retry, parse_options};
use crate::core::errors::{CheckError, Result};
use crate::logger::Logger;
use crate::rpc::ProcessInfo;

pub const KIND: &str = "memory";

const DEFAULT_NUM_RETRIES: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryCheckConfig {
    /// Ceiling for `VmRSS`, in KiB.
    pub max_rss: u64,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
}

const fn default_num_retries() -> u32 {
    DEFAULT_NUM_RETRIES
}

/// Fails when a process's resident set grows past `max_rss`.
#[derive(Debug)]
pub struct MemoryCheck {
    config: MemoryCheckConfig,
    retry: Retry,
    proc_root: PathBuf,
    log: Logger,
}

impl MemoryCheck {
    #[must_use]
    pub fn new(config: MemoryCheckConfig, log: Logger) -> Self {
        Self {
            retry: Retry::new(config.num_retries),
            config,
            proc_root: PathBuf::from("/proc"),
            log,
        }
    }

    pub fn from_options(options: &toml::Table, log: Logger) -> Result<Self> {
        Ok(Self::new(parse_options(KIND, options)?, log))
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// Read status files from somewhere other than `/proc`.
    #[must_use]
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    fn rss_kib(&self, process: &ProcessInfo) -> Result<u64> {
        let path = self.proc_root.join(process.pid.to_string()).join("status");
        let status = std::fs::read_to_string(&path).map_err(|e| CheckError::io(&path, e))?;
        parse_vm_rss(&status).ok_or_else(|| {
            CheckError::check_failed(KIND, &process.name, format!("no VmRSS line in {}", path.display()))
        })
    }
}

/// Extract `VmRSS` (KiB) from a `/proc/<pid>/status` document.
#[must_use]
pub fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse().ok())
}

impl Check for MemoryCheck {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, process: &ProcessInfo) -> Result<bool> {
        if process.pid == 0 {
            return Err(CheckError::check_failed(KIND, &process.name, "process has no pid"));
        }
        let rss = self.retry.run(&self.log, || self.rss_kib(process))?;
        if rss > self.config.max_rss {
            self.log.log(format_args!(
                "Process {} RSS {rss} KiB is above the {} KiB limit",
                process.name, self.config.max_rss
            ));
            return Ok(false);
        }
        Ok(true)
    }
}
