//! Check capabilities: the `Check` contract, the type-keyed factory that builds
//! checks from configuration, and helpers shared by the built-in checks.

pub mod file;
pub mod memory;
pub mod tcp;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::core::config::CheckSpec;
use crate::core::errors::{CheckError, Result};
use crate::logger::Logger;
use crate::rpc::ProcessInfo;

pub use file::FileCheck;
pub use memory::MemoryCheck;
pub use tcp::TcpCheck;

/// A unit of liveness logic evaluated against one process.
///
/// `Ok(true)` is a pass, `Ok(false)` a failure that warrants a restart, and
/// `Err(_)` means the check could not reach a verdict.
pub trait Check: Send + Sync {
    /// Identifier used in log lines.
    fn name(&self) -> &str;

    fn evaluate(&self, process: &ProcessInfo) -> Result<bool>;
}

/// Builds one check from its opaque options table.
pub type CheckFactory = Arc<dyn Fn(&toml::Table, Logger) -> Result<Box<dyn Check>> + Send + Sync>;

/// Factory registry keyed by check type.
#[derive(Clone)]
pub struct CheckRegistry {
    factories: BTreeMap<String, CheckFactory>,
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Default for CheckRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CheckRegistry {
    /// Registry with no check types.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the `file`, `memory` and `tcp` checks.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(file::KIND, |options, log| {
            Ok(Box::new(FileCheck::from_options(options, log)?))
        });
        registry.register(memory::KIND, |options, log| {
            Ok(Box::new(MemoryCheck::from_options(options, log)?))
        });
        registry.register(tcp::KIND, |options, log| {
            Ok(Box::new(TcpCheck::from_options(options, log)?))
        });
        registry
    }

    /// Add or replace the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&toml::Table, Logger) -> Result<Box<dyn Check>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate one configured check.
    pub fn build(&self, spec: &CheckSpec, log: &Logger) -> Result<Box<dyn Check>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| CheckError::UnknownCheck {
                kind: spec.kind.clone(),
            })?;
        factory(&spec.options, log.clone())
    }

    /// Instantiate every configured check, preserving declaration order.
    pub fn build_all(&self, specs: &[CheckSpec], log: &Logger) -> Result<Vec<Box<dyn Check>>> {
        specs.iter().map(|spec| self.build(spec, log)).collect()
    }
}

/// Deserialize a check's options table into its typed configuration.
pub fn parse_options<T: DeserializeOwned>(check: &'static str, options: &toml::Table) -> Result<T> {
    toml::Value::Table(options.clone())
        .try_into()
        .map_err(|e: toml::de::Error| CheckError::InvalidCheckConfig {
            check,
            details: e.message().to_string(),
        })
}

// ──────────────────── retries ────────────────────

/// Delay unit between attempts; attempt `n` waits `n * RETRY_SLEEP`.
pub const RETRY_SLEEP: Duration = Duration::from_secs(3);

/// Linear-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    num_retries: u32,
    base_delay: Duration,
}

impl Retry {
    #[must_use]
    pub const fn new(num_retries: u32) -> Self {
        Self {
            num_retries,
            base_delay: RETRY_SLEEP,
        }
    }

    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Run `op`, retrying retryable failures up to `num_retries` times. The
    /// last error is returned once retries are exhausted; any other error is
    /// returned at once.
    pub fn run<T>(&self, log: &Logger, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.num_retries && err.is_retryable() => {
                    attempt += 1;
                    let retry_in = self.base_delay * attempt;
                    log.log(format_args!(
                        "Exception occurred: {err}. Retry in {} seconds.",
                        retry_in.as_secs_f64()
                    ));
                    thread::sleep(retry_in);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ──────────────────── port extraction ────────────────────

/// A literal port or a pattern whose single capture group yields the port
/// from the process name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u16),
    Pattern(String),
}

/// Resolve a port for `process_name`.
pub fn get_port(spec: &PortSpec, process_name: &str) -> Result<u16> {
    let pattern = match spec {
        PortSpec::Number(port) => return Ok(*port),
        PortSpec::Pattern(pattern) => pattern,
    };
    if let Ok(port) = pattern.trim().parse::<u16>() {
        return Ok(port);
    }

    let invalid = |details: String| CheckError::InvalidCheckConfig {
        check: "port",
        details,
    };
    let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| invalid(e.to_string()))?;
    let captures = regex.captures(process_name).ok_or_else(|| {
        invalid(format!(
            "could not extract port number for process name {process_name} using regular expression {pattern}"
        ))
    })?;
    if captures.len() != 2 {
        return Err(invalid(format!(
            "regular expression {pattern} must have exactly one capture group"
        )));
    }
    let raw = captures.get(1).map_or("", |m| m.as_str());
    raw.parse::<u16>()
        .map_err(|e| invalid(format!("captured {raw:?} is not a port: {e}")))
}
