//! Start/stop control of a running mirror.

use crate::config::{ConfigSpec, MirrorConfig, Settings, CONFIG_SCHEMA};
use crate::error::{MirrorError, Result};
use crate::reconcile::Reconciler;
use crate::registry::{EventListener, RegistryClient, RegistryConnector};
use crate::scheduler::FixedRateScheduler;
use crate::sink::Sink;
use crate::translate::EventTranslator;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Name of the reconciliation thread.
const RECONCILE_THREAD: &str = "registry-reconcile";

/// Lifecycle of a [`Mirror`]. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Running => write!(f, "running"),
            LifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// A registry mirror as seen by the host pipeline.
///
/// `start` blocks its caller for the whole run; `stop` and
/// `await_termination` may be called from any other thread, so the mirror is
/// normally held in an `Arc`.
///
/// ```ignore
/// let mirror = Arc::new(Mirror::new("mirror-1", settings, Arc::new(registry)));
/// let runner = Arc::clone(&mirror);
/// let handle = std::thread::spawn(move || runner.start(Arc::new(sink)));
///
/// // ... later
/// mirror.stop();
/// handle.join().unwrap()?;
/// ```
pub struct Mirror {
    id: String,
    settings: Settings,
    connector: Arc<dyn RegistryConnector>,
    started: AtomicBool,
    state: Mutex<LifecycleState>,
    state_changed: Condvar,
}

impl Mirror {
    pub fn new(
        id: impl Into<String>,
        settings: Settings,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        Self {
            id: id.into(),
            settings,
            connector,
            started: AtomicBool::new(false),
            state: Mutex::new(LifecycleState::Created),
            state_changed: Condvar::new(),
        }
    }

    /// Configuration keys understood by the mirror, with their defaults.
    pub fn config_schema() -> &'static [ConfigSpec] {
        &CONFIG_SCHEMA
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Run the mirror until [`stop`](Self::stop) is called.
    ///
    /// Parses the settings, connects, and reconciles immediately and then
    /// every poll interval, delivering change records to `sink`. Returns
    /// `Ok(())` after a stop once the schedule is halted and the client shut
    /// down. Configuration and connection failures are returned without the
    /// mirror ever running; the mirror is then stopped.
    pub fn start(&self, sink: Arc<dyn Sink>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MirrorError::AlreadyStarted);
        }
        if self.state() == LifecycleState::Stopped {
            return Err(MirrorError::InvalidState(
                "mirror was stopped before it started".to_string(),
            ));
        }

        let (config, client) = match self.open() {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(id = %self.id, error = %e, "Mirror failed to start");
                self.transition(LifecycleState::Stopped);
                return Err(e);
            }
        };

        let listener: Arc<dyn EventListener> =
            Arc::new(EventTranslator::new(config.namespace.clone(), sink));
        let mut reconciler = Reconciler::new(
            Arc::clone(&client),
            listener,
            config.group.clone(),
            config.page_size,
        );

        let scheduler = {
            let mut state = self.state.lock();
            if *state == LifecycleState::Stopped {
                // Stopped while connecting.
                drop(state);
                close_client(client.as_ref());
                return Ok(());
            }

            let spawned = FixedRateScheduler::spawn(RECONCILE_THREAD, config.interval, move || {
                match reconciler.tick() {
                    Ok(report) => tracing::debug!(
                        listed = report.listed,
                        absorbed = report.absorbed,
                        subscribed = report.subscribed,
                        watched = reconciler.ledger().len(),
                        "Reconciliation tick complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Reconciliation tick failed"),
                }
            });
            match spawned {
                Ok(scheduler) => {
                    *state = LifecycleState::Running;
                    self.state_changed.notify_all();
                    scheduler
                }
                Err(e) => {
                    *state = LifecycleState::Stopped;
                    self.state_changed.notify_all();
                    drop(state);
                    tracing::error!(id = %self.id, error = %e, "Mirror failed to start");
                    close_client(client.as_ref());
                    return Err(e);
                }
            }
        };

        tracing::info!(
            id = %self.id,
            namespace = %config.namespace,
            group = %config.group,
            interval_secs = config.interval.as_secs(),
            "Mirror running"
        );

        self.await_termination();

        scheduler.shutdown();
        close_client(client.as_ref());
        tracing::info!(id = %self.id, "Mirror stopped");
        Ok(())
    }

    fn open(&self) -> Result<(MirrorConfig, Arc<dyn RegistryClient>)> {
        let config = MirrorConfig::from_settings(&self.settings)?;
        let client = self
            .connector
            .connect(&config.server_addr, &config.namespace)?;
        Ok((config, client))
    }

    /// Ask a running mirror to stop. Safe from any thread; repeat calls are no-ops.
    pub fn stop(&self) {
        if self.transition(LifecycleState::Stopped) {
            tracing::info!(id = %self.id, "Mirror stop requested");
        }
    }

    /// Block until the mirror is stopped.
    pub fn await_termination(&self) {
        let mut state = self.state.lock();
        while *state != LifecycleState::Stopped {
            self.state_changed.wait(&mut state);
        }
    }

    /// Block until the mirror is stopped or `timeout` elapses. Returns
    /// whether the mirror is stopped.
    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.await_termination();
            return true;
        };
        let mut state = self.state.lock();
        while *state != LifecycleState::Stopped {
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                return *state == LifecycleState::Stopped;
            }
        }
        true
    }

    /// Move to `next`, waking waiters. Returns false if already there.
    fn transition(&self, next: LifecycleState) -> bool {
        let mut state = self.state.lock();
        if *state == next {
            return false;
        }
        *state = next;
        self.state_changed.notify_all();
        true
    }
}

fn close_client(client: &dyn RegistryClient) {
    if let Err(e) = client.shutdown() {
        tracing::warn!(error = %e, "Registry client shutdown failed");
    }
}
