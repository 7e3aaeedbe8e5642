//! Fixed-rate task scheduling on a dedicated thread.

use crate::error::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Runs a task immediately and then every `period`, measured from the
/// schedule start.
///
/// All runs happen on one thread, so they never overlap. A run that overruns
/// one or more periods causes the missed slots to be skipped. Dropping the
/// scheduler stops it and waits for an in-flight run to finish.
pub struct FixedRateScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FixedRateScheduler {
    pub fn spawn<F>(name: &str, period: Duration, task: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let period = period.max(Duration::from_millis(1));

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut task = task;
                let mut next = Instant::now();
                loop {
                    match stop_rx.recv_deadline(next) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Explicit stop or scheduler dropped.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if panic::catch_unwind(AssertUnwindSafe(&mut task)).is_err() {
                        tracing::error!("Scheduled task panicked");
                    }

                    let Some(due) = next_slot(next, period, Instant::now()) else {
                        tracing::error!(?period, "Next run is not representable, scheduler exiting");
                        break;
                    };
                    if due.skipped > 0 {
                        tracing::warn!(
                            skipped = due.skipped,
                            "Scheduled task overran its period, skipping runs"
                        );
                    }
                    next = due.at;
                }
                tracing::debug!("Scheduler stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop scheduling and wait for an in-flight run to complete.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Scheduler thread panicked");
            }
        }
    }
}

/// Next run of a fixed-rate schedule.
#[derive(Debug, PartialEq, Eq)]
struct Slot {
    at: Instant,
    /// Slots that already passed and will not run.
    skipped: u64,
}

/// First slot after `last` on the `period` grid that is still in the future
/// relative to `now`. `None` if it cannot be represented.
fn next_slot(last: Instant, period: Duration, now: Instant) -> Option<Slot> {
    let mut at = last.checked_add(period)?;
    let mut skipped = 0u64;
    while at <= now {
        at = at.checked_add(period)?;
        skipped += 1;
    }
    Some(Slot { at, skipped })
}

impl Drop for FixedRateScheduler {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
