//! Test double for the supervisord control plane.
//!
//! Holds a process table behind a lock, records every call it receives, and
//! can be told to fault specific operations or to flip a process state the
//! moment it is enumerated (to reproduce enumerate-then-act races).

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ProcessInfo, ProcessState, RpcConnector, SupervisorRpc};
use crate::core::errors::{CheckError, Result};

/// Fault code supervisord uses for `NOT_RUNNING`.
pub const FAULT_NOT_RUNNING: i64 = 70;
/// Fault code supervisord uses for `BAD_NAME`.
pub const FAULT_BAD_NAME: i64 = 10;
/// Fault code supervisord uses for `ALREADY_STARTED`.
pub const FAULT_ALREADY_STARTED: i64 = 60;

/// One recorded RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    Connect,
    AllProcessInfo,
    ProcessInfo(String),
    Stop { name: String, wait: bool },
    Start { name: String, wait: bool },
}

#[derive(Debug, Default)]
struct State {
    processes: Vec<ProcessInfo>,
    calls: Vec<RpcCall>,
    stop_faults: HashMap<String, i64>,
    start_faults: HashMap<String, i64>,
    fail_enumeration: bool,
    state_after_enumeration: HashMap<String, ProcessState>,
}

/// Shared in-memory control plane. Clones observe the same table.
#[derive(Debug, Clone, Default)]
pub struct InMemorySupervisor {
    state: Arc<Mutex<State>>,
}

impl InMemorySupervisor {
    #[must_use]
    pub fn new(processes: Vec<ProcessInfo>) -> Self {
        let supervisor = Self::default();
        supervisor.state.lock().processes = processes;
        supervisor
    }

    /// Make `stopProcess` for `qualified_name` answer with a fault.
    pub fn fault_stop(&self, qualified_name: &str, code: i64) {
        self.state
            .lock()
            .stop_faults
            .insert(qualified_name.to_string(), code);
    }

    /// Make `startProcess` for `qualified_name` answer with a fault.
    pub fn fault_start(&self, qualified_name: &str, code: i64) {
        self.state
            .lock()
            .start_faults
            .insert(qualified_name.to_string(), code);
    }

    /// Make `getAllProcessInfo` fail as if the control plane were unreachable.
    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    /// Move `qualified_name` to `state` right after the next enumeration.
    pub fn change_state_after_enumeration(&self, qualified_name: &str, state: ProcessState) {
        self.state
            .lock()
            .state_after_enumeration
            .insert(qualified_name.to_string(), state);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RpcCall> {
        self.state.lock().calls.clone()
    }

    #[must_use]
    pub fn stop_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::Stop { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn start_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RpcCall::Start { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, RpcCall::Connect))
            .count()
    }

    #[must_use]
    pub fn state_of(&self, qualified_name: &str) -> Option<ProcessState> {
        self.state
            .lock()
            .processes
            .iter()
            .find(|p| p.qualified_name() == qualified_name)
            .map(|p| p.state)
    }

    fn fault(code: i64, qualified_name: &str) -> CheckError {
        let message = match code {
            FAULT_NOT_RUNNING => "NOT_RUNNING",
            FAULT_BAD_NAME => "BAD_NAME",
            FAULT_ALREADY_STARTED => "ALREADY_STARTED",
            _ => "FAILED",
        };
        CheckError::RpcFault {
            code,
            message: format!("{message}: {qualified_name}"),
        }
    }
}

impl SupervisorRpc for InMemorySupervisor {
    fn all_process_info(&self) -> Result<Vec<ProcessInfo>> {
        let mut state = self.state.lock();
        state.calls.push(RpcCall::AllProcessInfo);
        if state.fail_enumeration {
            return Err(CheckError::RpcTransport {
                endpoint: "memory".to_string(),
                details: "control plane unreachable".to_string(),
            });
        }
        let snapshot = state.processes.clone();
        let pending = std::mem::take(&mut state.state_after_enumeration);
        for process in &mut state.processes {
            if let Some(next) = pending.get(&process.qualified_name()) {
                process.state = *next;
            }
        }
        Ok(snapshot)
    }

    fn process_info(&self, qualified_name: &str) -> Result<ProcessInfo> {
        let mut state = self.state.lock();
        state
            .calls
            .push(RpcCall::ProcessInfo(qualified_name.to_string()));
        state
            .processes
            .iter()
            .find(|p| p.qualified_name() == qualified_name)
            .cloned()
            .ok_or_else(|| Self::fault(FAULT_BAD_NAME, qualified_name))
    }

    fn stop_process(&self, qualified_name: &str, wait: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(RpcCall::Stop {
            name: qualified_name.to_string(),
            wait,
        });
        if let Some(code) = state.stop_faults.get(qualified_name).copied() {
            return Err(Self::fault(code, qualified_name));
        }
        let process = state
            .processes
            .iter_mut()
            .find(|p| p.qualified_name() == qualified_name)
            .ok_or_else(|| Self::fault(FAULT_BAD_NAME, qualified_name))?;
        if process.state != ProcessState::Running {
            return Err(Self::fault(FAULT_NOT_RUNNING, qualified_name));
        }
        process.state = ProcessState::Stopped;
        process.pid = 0;
        Ok(())
    }

    fn start_process(&self, qualified_name: &str, wait: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(RpcCall::Start {
            name: qualified_name.to_string(),
            wait,
        });
        if let Some(code) = state.start_faults.get(qualified_name).copied() {
            return Err(Self::fault(code, qualified_name));
        }
        let process = state
            .processes
            .iter_mut()
            .find(|p| p.qualified_name() == qualified_name)
            .ok_or_else(|| Self::fault(FAULT_BAD_NAME, qualified_name))?;
        if process.state == ProcessState::Running {
            return Err(Self::fault(FAULT_ALREADY_STARTED, qualified_name));
        }
        process.state = if wait {
            ProcessState::Running
        } else {
            ProcessState::Starting
        };
        Ok(())
    }
}

impl RpcConnector for InMemorySupervisor {
    fn connect(&self) -> Result<Box<dyn SupervisorRpc>> {
        self.state.lock().calls.push(RpcCall::Connect);
        Ok(Box::new(self.clone()))
    }
}
