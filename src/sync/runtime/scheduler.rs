use std::time::Duration;

use tokio::sync::watch;

use super::backoff::Backoff;
use crate::error::Severity;
use crate::sync::engine::SyncEngine;
use crate::sync::source::RecordSource;
use crate::sync::types::CycleOutcome;

/// Process exit codes, `sysexits.h` style.
pub const EXIT_OK: i32 = 0;
pub const EXIT_TEMPFAIL: i32 = 75;
pub const EXIT_CONFIG: i32 = 78;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
}

/// Classification of a single one-shot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Transient,
    Fatal,
}

impl RunStatus {
    pub fn from_outcome(outcome: &CycleOutcome) -> Self {
        match outcome.severity() {
            None => RunStatus::Success,
            Some(Severity::Transient) => RunStatus::Transient,
            Some(Severity::Fatal) => RunStatus::Fatal,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => EXIT_OK,
            RunStatus::Transient => EXIT_TEMPFAIL,
            RunStatus::Fatal => EXIT_CONFIG,
        }
    }
}

/// Why the daemon loop returned.
#[derive(Debug)]
pub enum SchedulerExit {
    /// Shutdown was requested.
    Stopped,
    /// A cycle failed in a way retrying cannot fix.
    Halted(CycleOutcome),
}

impl SchedulerExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SchedulerExit::Stopped => EXIT_OK,
            SchedulerExit::Halted(_) => EXIT_CONFIG,
        }
    }
}

/// Drives the engine one cycle at a time.
///
/// The next cycle is only armed once the current cycle's outcome is known, which
/// serializes every store access without locks.
pub struct Scheduler<S> {
    engine: SyncEngine<S>,
    interval: Duration,
    backoff: Backoff,
}

impl<S: RecordSource> Scheduler<S> {
    pub fn new(engine: SyncEngine<S>, config: &SchedulerConfig) -> Self {
        Self {
            engine,
            interval: config.interval,
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
        }
    }

    pub fn engine(&self) -> &SyncEngine<S> {
        &self.engine
    }

    pub fn into_engine(self) -> SyncEngine<S> {
        self.engine
    }

    /// One cycle, then done.
    pub async fn run_once(&mut self) -> (RunStatus, CycleOutcome) {
        let outcome = self.engine.run_once().await;
        let status = RunStatus::from_outcome(&outcome);
        log::info!("[SCHEDULER] one-shot run finished: {:?} ({})", status, outcome);
        (status, outcome)
    }

    /// Runs cycles until shutdown is signalled or a fatal failure occurs.
    ///
    /// Shutdown is honoured while sleeping and while a fetch is in flight; nothing
    /// has been written at either point.
    pub async fn run_daemon(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerExit {
        log::info!("[SCHEDULER] daemon started, interval {:?}", self.interval);

        loop {
            if *shutdown.borrow() {
                log::info!("[SCHEDULER] shutdown requested; not starting another cycle");
                return SchedulerExit::Stopped;
            }

            let outcome = tokio::select! {
                outcome = self.engine.run_once() => outcome,
                _ = shutdown_signalled(&mut shutdown) => {
                    self.engine.abandon_cycle();
                    log::info!("[SCHEDULER] shutdown during fetch; cycle abandoned");
                    return SchedulerExit::Stopped;
                }
            };

            let delay = match outcome.severity() {
                None => {
                    self.backoff.reset();
                    self.interval
                }
                Some(Severity::Transient) => {
                    let delay = self.backoff.next_delay();
                    log::warn!("[SCHEDULER] transient failure, retrying in {:?}", delay);
                    delay
                }
                Some(Severity::Fatal) => {
                    log::error!(
                        "[SCHEDULER] fatal failure, automatic syncing stopped ({}): {}",
                        self.engine.phase(),
                        outcome
                    );
                    return SchedulerExit::Halted(outcome);
                }
            };

            log::debug!("[SCHEDULER] next cycle in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_signalled(&mut shutdown) => {
                    log::info!("[SCHEDULER] shutdown while idle");
                    return SchedulerExit::Stopped;
                }
            }
        }
    }
}

/// Resolves once `true` is sent. A dropped sender never resolves.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
