use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{IdentityLedger, StopFlag};

/// Adaptive cadence of the background compactor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactorSchedule {
    /// Default per-cycle limit on identifiers applied.
    pub max_limit: usize,
    /// Longest (and initial) wait between cycles.
    pub max_sleep: Duration,
    /// Shortest wait; reaching it lifts the per-cycle limit.
    pub min_sleep: Duration,
}

impl Default for CompactorSchedule {
    fn default() -> Self {
        Self {
            max_limit: 1_000,
            max_sleep: Duration::from_millis(10_000),
            min_sleep: Duration::from_millis(1_000),
        }
    }
}

impl CompactorSchedule {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.max_limit == 0 {
            return Err(LedgerError::Config("checkpoint limit must be positive".into()));
        }
        if self.min_sleep.is_zero() || self.min_sleep > self.max_sleep {
            return Err(LedgerError::Config(format!(
                "checkpoint sleep bounds invalid: min {:?}, max {:?}",
                self.min_sleep, self.max_sleep
            )));
        }
        Ok(())
    }

    pub fn initial(&self) -> Cadence {
        Cadence {
            wait: self.max_sleep,
            limit: Some(self.max_limit),
        }
    }
}

/// Current wait and processing limit of the compactor loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cadence {
    pub wait: Duration,
    /// `None` means unlimited.
    pub limit: Option<usize>,
}

impl Cadence {
    /// Adjust after a cycle: back off when the log was drained, speed up
    /// when it was not.
    pub fn after_cycle(self, drained: bool, schedule: &CompactorSchedule) -> Self {
        let mut next = self;
        if drained {
            next.wait = self.wait.saturating_mul(2);
            if next.wait > schedule.max_sleep {
                next.wait = schedule.max_sleep;
                next.limit = Some(schedule.max_limit);
            }
        } else {
            next.wait = self.wait / 2;
            if next.wait < schedule.min_sleep {
                next.wait = schedule.min_sleep;
                next.limit = None;
            }
        }
        next
    }
}

struct Signal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Background thread that drains an [`IdentityLedger`] on an adaptive
/// schedule.
///
/// Construction only wires dependencies; [`Compactor::start`] spawns the
/// thread and [`Compactor::stop`] signals and joins it.
pub struct Compactor {
    ledger: Arc<IdentityLedger>,
    schedule: CompactorSchedule,
    signal: Arc<Signal>,
    stop_flag: StopFlag,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub fn new(ledger: Arc<IdentityLedger>, schedule: CompactorSchedule) -> LedgerResult<Self> {
        schedule.validate()?;
        Ok(Self {
            ledger,
            schedule,
            signal: Arc::new(Signal {
                stopped: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
            stop_flag: StopFlag::new(),
            handle: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Spawn the compaction thread. A compactor runs at most once.
    pub fn start(&self) -> LedgerResult<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.stop_flag.is_stopped() {
            return Err(LedgerError::Consistency(
                "compactor already started".into(),
            ));
        }
        let ledger = Arc::clone(&self.ledger);
        let signal = Arc::clone(&self.signal);
        let stop = self.stop_flag.clone();
        let schedule = self.schedule;
        let spawned = thread::Builder::new()
            .name("mos-compactor".into())
            .spawn(move || run(ledger, signal, stop, schedule))?;
        *handle = Some(spawned);
        info!(
            max_sleep_ms = schedule.max_sleep.as_millis() as u64,
            max_limit = schedule.max_limit,
            "compactor started"
        );
        Ok(())
    }

    /// Raise the stop flag, wake the thread and wait for it to exit.
    pub fn stop(&self) {
        self.stop_flag.stop();
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("compactor thread panicked");
            } else {
                info!("compactor stopped");
            }
        }
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(ledger: Arc<IdentityLedger>, signal: Arc<Signal>, stop: StopFlag, schedule: CompactorSchedule) {
    let mut cadence = schedule.initial();
    loop {
        {
            let mut stopped = signal.stopped.lock();
            if !*stopped {
                signal.wakeup.wait_for(&mut stopped, cadence.wait);
            }
            if *stopped {
                break;
            }
        }
        match ledger.run_compaction(&stop, cadence.limit) {
            Ok(drained) => {
                cadence = cadence.after_cycle(drained, &schedule);
                debug!(
                    drained,
                    wait_ms = cadence.wait.as_millis() as u64,
                    limit = ?cadence.limit,
                    "compaction cycle finished"
                );
            }
            Err(e) => error!(error = %e, "identity ledger checkpoint failed"),
        }
    }
}
