//! Per-process check sequence and the stop-then-start restart transition.
//!
//! Checks run strictly in configured order. The first failing check ends the
//! sequence and triggers one restart attempt; a check that errors (or panics)
//! is logged and skipped without counting as pass or fail.
//!
//! The restart re-reads the process through a client of its own and only acts
//! when that fresh snapshot is still RUNNING.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::checks::Check;
use crate::core::errors::{CheckError, Result};
use crate::logger::Logger;
use crate::rpc::{ProcessInfo, ProcessState, RpcConnector};

/// How one restart attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// Fresh state was not RUNNING; nothing was touched.
    Skipped { state: ProcessState },
    /// Stop and start were both attempted; flags record which calls succeeded.
    Done { stopped: bool, started: bool },
    /// No client could be built or the fresh state could not be read.
    Aborted { reason: String },
}

/// How one process fared within one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No check failed. `inconclusive` counts checks that produced no verdict.
    Healthy { inconclusive: usize },
    /// `check` failed and a restart was attempted.
    Restarted {
        check: String,
        restart: RestartOutcome,
    },
    /// The worker itself died; nothing is known about the process.
    Crashed { reason: String },
}

impl ProcessOutcome {
    #[must_use]
    pub const fn restart_attempted(&self) -> bool {
        matches!(self, Self::Restarted { .. })
    }
}

/// Runs the configured checks for a process and restarts it on failure.
pub struct RestartController {
    checks: Vec<Box<dyn Check>>,
    connector: Arc<dyn RpcConnector>,
    log: Logger,
}

impl std::fmt::Debug for RestartController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartController")
            .field("checks", &self.check_names())
            .finish_non_exhaustive()
    }
}

impl RestartController {
    #[must_use]
    pub fn new(checks: Vec<Box<dyn Check>>, connector: Arc<dyn RpcConnector>, log: Logger) -> Self {
        Self {
            checks,
            connector,
            log,
        }
    }

    #[must_use]
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Evaluate every check in order; restart on the first failure.
    pub fn check_and_maybe_restart(&self, process: &ProcessInfo) -> ProcessOutcome {
        let mut inconclusive = 0;
        for check in &self.checks {
            self.log.log(format_args!(
                "Performing {} check for process name {}",
                check.name(),
                process.name
            ));
            match evaluate_guarded(check.as_ref(), process) {
                Ok(true) => {
                    self.log.log(format_args!(
                        "{} check succeeded for process {}",
                        check.name(),
                        process.name
                    ));
                }
                Ok(false) => {
                    self.log.log(format_args!(
                        "{} check failed for process {}. Trying to restart.",
                        check.name(),
                        process.name
                    ));
                    return ProcessOutcome::Restarted {
                        check: check.name().to_string(),
                        restart: self.restart(process),
                    };
                }
                Err(err) => {
                    inconclusive += 1;
                    self.log.log(format_args!(
                        "{} check raised error for process {}: {err}",
                        check.name(),
                        process.name
                    ));
                }
            }
        }
        ProcessOutcome::Healthy { inconclusive }
    }

    /// Stop then start `process`, provided its fresh state is RUNNING.
    pub fn restart(&self, process: &ProcessInfo) -> RestartOutcome {
        let name = process.qualified_name();

        let rpc = match self.connector.connect() {
            Ok(rpc) => rpc,
            Err(err) => {
                self.log
                    .log(format_args!("Failed to connect to restart process {name}: {err}"));
                return RestartOutcome::Aborted {
                    reason: err.to_string(),
                };
            }
        };

        let fresh = match rpc.process_info(&name) {
            Ok(fresh) => fresh,
            Err(err) => {
                self.log
                    .log(format_args!("Failed to read state of process {name}: {err}"));
                return RestartOutcome::Aborted {
                    reason: err.to_string(),
                };
            }
        };
        if fresh.state != ProcessState::Running {
            self.log.log(format_args!(
                "{name} not in RUNNING state ({}), cannot restart",
                fresh.state
            ));
            return RestartOutcome::Skipped { state: fresh.state };
        }

        self.log.log(format_args!("Trying to stop process {name}"));
        // A failed stop usually means the process already went down; the
        // start below still brings it back.
        let stopped = match rpc.stop_process(&name, true) {
            Ok(()) => {
                self.log.log(format_args!("Stopped process {name}"));
                true
            }
            Err(err) => {
                self.log
                    .log(format_args!("Failed to stop process {name}: {err}"));
                false
            }
        };

        self.log.log(format_args!("Starting process {name}"));
        let started = match rpc.start_process(&name, false) {
            Ok(()) => true,
            Err(err) => {
                self.log
                    .log(format_args!("Failed to start process {name}: {err}"));
                false
            }
        };

        RestartOutcome::Done { stopped, started }
    }
}

/// Run one check, converting a panic into an error.
fn evaluate_guarded(check: &dyn Check, process: &ProcessInfo) -> Result<bool> {
    panic::catch_unwind(AssertUnwindSafe(|| check.evaluate(process))).unwrap_or_else(|payload| {
        Err(CheckError::check_failed(
            check.name(),
            &process.name,
            format!("panicked: {}", panic_message(payload.as_ref())),
        ))
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
