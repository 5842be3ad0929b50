//! supervisord health-check event listener.
//!
//! Subscribes to supervisord tick events, evaluates a configured sequence of
//! checks against every RUNNING process in a group (with at most 16 checks in
//! flight), and restarts processes that fail.

pub mod checks;
#[cfg(feature = "cli")]
pub mod cli_app;
pub mod core;
pub mod daemon;
pub mod heartbeat;
pub mod listener;
pub mod logger;
pub mod rpc;

pub use crate::checks::{Check, CheckRegistry};
pub use crate::core::config::{CheckSpec, Config, Target};
pub use crate::core::errors::{CheckError, Result};
pub use crate::daemon::loop_main::{CheckRunner, RunSummary, StopReason};
pub use crate::daemon::signals::Shutdown;
pub use crate::logger::Logger;
