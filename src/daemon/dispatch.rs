//! Tick dispatch: enumerate target processes and fan the check-and-restart
//! sequence out over a bounded pool of scoped worker threads.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::unbounded;

use super::restart::{ProcessOutcome, RestartController, panic_message};
use crate::core::config::{DEFAULT_MAX_WORKERS, Target};
use crate::core::errors::Result;
use crate::logger::Logger;
use crate::rpc::{ProcessInfo, SupervisorRpc};

/// Apply `f` to every item with at most `cap` calls in flight.
///
/// When only one call can run at a time (one item, or `cap <= 1`) everything
/// runs on the calling thread and no worker is spawned. Results come back in
/// input order; a panicking call yields `Err` with the panic message instead of
/// tearing down its siblings.
pub fn map_bounded<T, R, F>(items: &[T], cap: usize, f: F) -> Vec<std::result::Result<R, String>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let guarded = |item: &T| {
        panic::catch_unwind(AssertUnwindSafe(|| f(item))).map_err(|p| panic_message(p.as_ref()))
    };

    let width = cap.min(items.len());
    if width <= 1 {
        return items.iter().map(guarded).collect();
    }

    let (work_tx, work_rx) = unbounded::<(usize, &T)>();
    for job in items.iter().enumerate() {
        // The receiver is alive in this scope; sending cannot fail.
        let _ = work_tx.send(job);
    }
    drop(work_tx);

    let (done_tx, done_rx) = unbounded();
    thread::scope(|scope| {
        for _ in 0..width {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let guarded = &guarded;
            scope.spawn(move || {
                for (index, item) in work_rx {
                    let _ = done_tx.send((index, guarded(item)));
                }
            });
        }
    });
    drop(done_tx);

    let mut slots: Vec<Option<std::result::Result<R, String>>> =
        std::iter::repeat_with(|| None).take(items.len()).collect();
    for (index, result) in done_rx {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err("worker exited before reporting".to_string())))
        .collect()
}

/// Result of one check cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Processes that matched the target and were RUNNING.
    pub matched: usize,
    /// Threads used; zero when the cycle ran inline.
    pub workers: usize,
    /// `(qualified name, outcome)` in enumeration order.
    pub outcomes: Vec<(String, ProcessOutcome)>,
}

impl CycleReport {
    #[must_use]
    pub fn restarts(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.restart_attempted())
            .count()
    }
}

/// Runs one health-check cycle per tick.
pub struct Dispatcher {
    rpc: Box<dyn SupervisorRpc>,
    controller: RestartController,
    target: Target,
    max_workers: usize,
    log: Logger,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("target", &self.target)
            .field("max_workers", &self.max_workers)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// `rpc` is the long-lived client used only for enumeration.
    #[must_use]
    pub fn new(
        rpc: Box<dyn SupervisorRpc>,
        controller: RestartController,
        target: Target,
        log: Logger,
    ) -> Self {
        Self {
            rpc,
            controller,
            target,
            max_workers: DEFAULT_MAX_WORKERS,
            log,
        }
    }

    /// Lower the worker cap. Values outside `1..=16` are clamped into it.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, DEFAULT_MAX_WORKERS);
        self
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Target processes currently RUNNING, per a fresh enumeration.
    pub fn running_targets(&self) -> Result<Vec<ProcessInfo>> {
        Ok(self
            .rpc
            .all_process_info()?
            .into_iter()
            .filter(|p| self.target.matches(&p.group, &p.name) && p.is_running())
            .collect())
    }

    /// Check every running target process once.
    ///
    /// Fails only when enumeration fails; per-process problems end up in the
    /// report and the log.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let processes = self.running_targets()?;
        if processes.is_empty() {
            self.log.log(format_args!(
                "No processes in state RUNNING found for {}",
                self.target.describe()
            ));
            return Ok(CycleReport::default());
        }

        let width = self.max_workers.min(processes.len());
        let controller = &self.controller;
        let results = map_bounded(&processes, width, |process| {
            controller.check_and_maybe_restart(process)
        });

        let outcomes = processes
            .iter()
            .zip(results)
            .map(|(process, result)| {
                let outcome = result.unwrap_or_else(|reason| {
                    self.log.log(format_args!(
                        "Health check worker for process {} crashed: {reason}",
                        process.name
                    ));
                    ProcessOutcome::Crashed { reason }
                });
                (process.qualified_name(), outcome)
            })
            .collect();

        Ok(CycleReport {
            matched: processes.len(),
            workers: if width > 1 { width } else { 0 },
            outcomes,
        })
    }
}
