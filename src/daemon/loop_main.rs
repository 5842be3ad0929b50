//! Main event loop: wait for an event, run a check cycle on ticks, acknowledge,
//! repeat until the shutdown token is set or the control channel closes.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use super::dispatch::{CycleReport, Dispatcher};
use super::restart::RestartController;
use super::signals::{Shutdown, signal_name};
use crate::checks::{Check, CheckRegistry};
use crate::core::config::Config;
use crate::core::errors::{CheckError, Result};
use crate::listener::{self, Event, EventKind, EventListener};
use crate::logger::Logger;
use crate::rpc::{RpcConnector, XmlRpcConnector};

const DEFAULT_POLL: Duration = Duration::from_millis(200);

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown token was set.
    Shutdown,
    /// The control plane closed the channel.
    ChannelClosed,
}

/// Totals for one daemon run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub events: usize,
    pub cycles: usize,
    pub failed_cycles: usize,
    pub restarts: usize,
    pub stop_reason: StopReason,
}

/// The health-check event listener.
#[derive(Debug)]
pub struct CheckRunner {
    dispatcher: Dispatcher,
    shutdown: Shutdown,
    log: Logger,
    checks_summary: String,
    poll: Duration,
}

impl CheckRunner {
    /// Wire a runner from already-built parts.
    pub fn new(
        config: &Config,
        checks: Vec<Box<dyn Check>>,
        connector: Arc<dyn RpcConnector>,
        shutdown: Shutdown,
        log: Logger,
    ) -> Result<Self> {
        config.validate()?;
        let target = config.target()?;
        let rpc = connector.connect()?;
        let controller = RestartController::new(checks, connector, log.clone());
        let dispatcher = Dispatcher::new(rpc, controller, target, log.clone())
            .with_max_workers(config.max_workers);
        Ok(Self {
            dispatcher,
            shutdown,
            log,
            checks_summary: config.checks_summary(),
            poll: DEFAULT_POLL,
        })
    }

    /// Build checks through `registry` and talk XML-RPC to the supervisord
    /// named by the configured (or process) environment.
    pub fn from_config(
        config: &Config,
        registry: &CheckRegistry,
        shutdown: Shutdown,
        log: Logger,
    ) -> Result<Self> {
        let connector = XmlRpcConnector::from_env(&config.environment())?
            .with_timeout(Duration::from_secs(config.rpc_timeout));
        log.log(format_args!(
            "Using supervisord at {} (timeout {}s).",
            connector.endpoint(),
            config.rpc_timeout
        ));
        let checks = registry.build_all(&config.checks, &log)?;
        Self::new(config, checks, Arc::new(connector), shutdown, log)
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Serve events from `input`, answering on `output`.
    pub fn run<R, W>(&self, input: R, mut output: W) -> Result<RunSummary>
    where
        R: BufRead + Send + 'static,
        W: Write,
    {
        let target = self.dispatcher.target().describe();
        self.log.log(format_args!(
            "Starting the health check for {target}. Checks config: {}",
            self.checks_summary
        ));

        let listener = EventListener::spawn(input)?.with_poll_interval(self.poll);
        let mut summary = RunSummary {
            events: 0,
            cycles: 0,
            failed_cycles: 0,
            restarts: 0,
            stop_reason: StopReason::Shutdown,
        };

        while !self.shutdown.is_requested() {
            let event = match listener.wait_for_event(&mut output, &self.shutdown) {
                Ok(event) => event,
                Err(CheckError::Interrupted) => break,
                Err(CheckError::ChannelClosed) => {
                    self.log.log("Event channel closed by the control plane.");
                    summary.stop_reason = StopReason::ChannelClosed;
                    break;
                }
                Err(err @ CheckError::Protocol { .. }) => {
                    self.log.log(format_args!("Dropping malformed event: {err}"));
                    listener::acknowledge(&mut output)?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            summary.events += 1;
            match self.handle_event(&event) {
                Some(Ok(report)) => {
                    summary.cycles += 1;
                    summary.restarts += report.restarts();
                }
                Some(Err(_)) => summary.failed_cycles += 1,
                None => {}
            }
            listener::acknowledge(&mut output)?;
        }

        if summary.stop_reason == StopReason::Shutdown {
            if let Some(signal) = self.shutdown.received_signal() {
                self.log.log(format_args!(
                    "Got signal {} ({signal})",
                    signal_name(signal)
                ));
            }
            self.log
                .log(format_args!("Health check for {target} has been told to stop."));
        }
        self.log.log("Done.");
        Ok(summary)
    }

    /// Run a cycle for tick events; anything else is only logged.
    /// `None` means no cycle was attempted.
    pub fn handle_event(&self, event: &Event) -> Option<Result<CycleReport>> {
        match &event.kind {
            EventKind::Tick(_) => {
                let result = self.dispatcher.run_cycle();
                if let Err(err) = &result {
                    self.log.log(format_args!(
                        "Health check cycle for {} failed: {err}",
                        self.dispatcher.target().describe()
                    ));
                }
                Some(result)
            }
            EventKind::Other(name) => {
                self.log
                    .log(format_args!("Received unsupported event type: {name}"));
                None
            }
        }
    }
}
