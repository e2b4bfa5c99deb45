//! Session engine - keeps the browser source on the channel's live chat
//!
//! A [`Session`] runs from stream start to stream stop. It owns the
//! per-session [`SessionContext`], drives one acquisition run, and hands
//! over to the periodic [`RefreshScheduler`] once a live identifier is known.

mod acquisition;
mod refresh;
mod session;

pub use acquisition::AcquisitionController;
pub use refresh::RefreshScheduler;
pub use session::Session;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, ShutdownSignal};
use crate::live::StateStore;
use crate::resolver::{ChannelRef, IdentifierResolver};
use crate::share::ShareLog;

/// Stream lifecycle signals from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Acquiring,
    Active,
    Stopping,
}

/// Typed engine settings derived from the config file
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channel: ChannelRef,
    pub device_name: String,
    pub write_path: Option<PathBuf>,
    pub read_path: Option<PathBuf>,

    /// Acquisition backoff before any failure
    pub base_interval: Duration,
    /// Floor for the wait between acquisition attempts
    pub min_interval: Duration,
    /// Ceiling for the acquisition backoff
    pub max_interval: Duration,
    pub max_attempts: u32,

    pub monitor_interval: Duration,
    pub update_interval: Duration,
    pub refresh_interval: Duration,
    pub probe_timeout: Duration,

    /// Bounded wait for background workers at session stop
    pub join_timeout: Duration,
    /// Plain misses needed before the refresh nudge escalates
    pub miss_threshold: u32,
}

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Everything one session's workers share.
///
/// Built fresh on every session start, so no identifier or flag survives
/// into the next session.
pub struct SessionContext {
    pub settings: SessionSettings,
    pub store: StateStore,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<dyn IdentifierResolver>,
    pub shutdown: ShutdownSignal,
    pub share_log: ShareLog,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionContext {
    pub fn new(
        settings: SessionSettings,
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<dyn IdentifierResolver>,
    ) -> Self {
        let share_log = ShareLog::new(settings.write_path.as_deref(), &settings.device_name);
        Self {
            store: StateStore::new(settings.miss_threshold),
            settings,
            dispatcher,
            resolver,
            shutdown: ShutdownSignal::new(),
            share_log,
            workers: Mutex::new(Vec::new()),
        }
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `work` on a named background thread tracked for the stop-time join.
    ///
    /// Returns false if the session is shutting down or the thread could
    /// not be spawned.
    pub fn spawn_worker<F>(&self, name: &str, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut workers = self.lock_workers();
        if self.shutdown.is_set() {
            debug!("Shutdown in progress, not spawning {}", name);
            return false;
        }
        workers.retain(|handle| !handle.is_finished());

        match std::thread::Builder::new().name(name.to_string()).spawn(work) {
            Ok(handle) => {
                workers.push(handle);
                true
            }
            Err(e) => {
                warn!("Failed to spawn {} worker: {}", name, e);
                false
            }
        }
    }

    /// Join all workers, abandoning any still running after `timeout`
    pub fn join_workers(&self, timeout: Duration) {
        let handles = std::mem::take(&mut *self.lock_workers());
        let deadline = Instant::now() + timeout;
        let mut abandoned = 0;

        for handle in handles {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL);
            }
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("Worker {} panicked", name);
                }
            } else {
                warn!("Worker {} still running after {:?}, abandoning it", name, timeout);
                abandoned += 1;
            }
        }

        if abandoned == 0 {
            info!("All session workers joined");
        }
    }
}
