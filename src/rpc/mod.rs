//! Supervision control-plane RPC: process descriptors, the client trait, and the
//! XML-RPC implementation that talks to supervisord.

#![allow(missing_docs)]

pub mod memory;
pub mod transport;
pub mod xmlrpc;

use std::fmt;

use serde::Serialize;

use crate::core::errors::Result;

pub use memory::{InMemorySupervisor, RpcCall};
pub use transport::{Endpoint, XmlRpcClient, XmlRpcConnector};

/// Process state as reported by supervisord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    /// Map supervisord's numeric state code. Unrecognized codes are `Unknown`.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Stopped,
            10 => Self::Starting,
            20 => Self::Running,
            30 => Self::Backoff,
            40 => Self::Stopping,
            100 => Self::Exited,
            200 => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    /// Numeric code used on the wire.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 10,
            Self::Running => 20,
            Self::Backoff => 30,
            Self::Stopping => 40,
            Self::Exited => 100,
            Self::Fatal => 200,
            Self::Unknown => 1000,
        }
    }

    /// Upper-case name as supervisord prints it.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Backoff => "BACKOFF",
            Self::Stopping => "STOPPING",
            Self::Exited => "EXITED",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    pub state: ProcessState,
    /// Zero when the process is not running.
    pub pid: u32,
    pub description: String,
}

impl ProcessInfo {
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>, state: ProcessState) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            state,
            pid: 0,
            description: String::new(),
        }
    }

    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// `<group>:<name>` identifier used to address the process over RPC.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.group, &self.name)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }
}

/// Build the `<group>:<name>` RPC identifier.
#[must_use]
pub fn qualified_name(group: &str, name: &str) -> String {
    format!("{group}:{name}")
}

/// Synchronous client for the supervision control plane.
///
/// Every method may fail with [`CheckError::RpcFault`](crate::core::errors::CheckError::RpcFault)
/// when the control plane rejects the call, or with a transport error when it
/// cannot be reached.
pub trait SupervisorRpc: Send {
    fn all_process_info(&self) -> Result<Vec<ProcessInfo>>;
    fn process_info(&self, qualified_name: &str) -> Result<ProcessInfo>;
    fn stop_process(&self, qualified_name: &str, wait: bool) -> Result<()>;
    fn start_process(&self, qualified_name: &str, wait: bool) -> Result<()>;
}

/// Produces independent RPC clients.
///
/// The restart path asks for a fresh client per transition so concurrent
/// workers never share client state.
pub trait RpcConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SupervisorRpc>>;
}
