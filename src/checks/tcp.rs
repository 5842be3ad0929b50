//! TCP connect check.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;

use super::{Check, PortSpec, Retry, get_port, parse_options};
use crate::core::errors::{CheckError, Result};
use crate::logger::Logger;
use crate::rpc::ProcessInfo;

pub const KIND: &str = "tcp";

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_NUM_RETRIES: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpCheckConfig {
    pub port: PortSpec,
    #[serde(default = "default_host")]
    pub host: String,
    /// Connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_num_retries() -> u32 {
    DEFAULT_NUM_RETRIES
}

/// Passes when a TCP connection to the process's port can be established.
#[derive(Debug)]
pub struct TcpCheck {
    config: TcpCheckConfig,
    retry: Retry,
    log: Logger,
}

impl TcpCheck {
    #[must_use]
    pub fn new(config: TcpCheckConfig, log: Logger) -> Self {
        Self {
            retry: Retry::new(config.num_retries),
            config,
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

    fn connect(&self, port: u16) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeout.max(1));
        let addrs: Vec<SocketAddr> = (self.config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| CheckError::check_failed(KIND, &self.config.host, e))?
            .collect();
        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(CheckError::check_failed(
            KIND,
            format!("{}:{port}", self.config.host),
            last_err.map_or_else(|| "no addresses resolved".to_string(), |e| e.to_string()),
        ))
    }
}

impl Check for TcpCheck {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, process: &ProcessInfo) -> Result<bool> {
        let port = get_port(&self.config.port, &process.name)?;
        self.log.log(format_args!(
            "Checking TCP connection on {}:{port} for process {}",
            self.config.host, process.name
        ));
        match self.retry.run(&self.log, || self.connect(port)) {
            Ok(()) => Ok(true),
            Err(err) => {
                self.log.log(format_args!(
                    "TCP connection to {}:{port} failed for process {}: {err}",
                    self.config.host, process.name
                ));
                Ok(false)
            }
        }
    }
}
