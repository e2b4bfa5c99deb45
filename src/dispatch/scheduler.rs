//! Periodic task hosting
//!
//! [`Scheduler`] is the seam between the engine and whatever drives its
//! timers. [`TimerLoop`] is the production host: one named thread that fires
//! every registered task when it falls due, never two at once. Because the
//! dispatcher's tick is registered here too, that thread is the only place
//! browser-source calls ever happen.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Handle returned by [`Scheduler::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    #[cfg(test)]
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Callback invoked on every period
pub type PeriodicTask = Arc<dyn Fn() + Send + Sync>;

/// Registry of periodic tasks
pub trait Scheduler: Send + Sync {
    /// Fire `task` every `interval`, first after one full interval
    fn register(&self, name: &'static str, interval: Duration, task: PeriodicTask) -> TimerId;

    /// Stop firing a task. Returns false if it was not registered.
    fn unregister(&self, id: TimerId) -> bool;
}

/// Idle wait when no timer is registered
const IDLE_WAIT: Duration = Duration::from_millis(250);

struct Timer {
    id: TimerId,
    name: &'static str,
    interval: Duration,
    next_due: Instant,
    task: PeriodicTask,
}

struct TimerTable {
    next_id: u64,
    timers: Vec<Timer>,
    running: bool,
}

struct TimerShared {
    table: Mutex<TimerTable>,
    wake: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single-threaded host loop for periodic tasks
pub struct TimerLoop {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerLoop {
    /// Spawn the host thread
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(TimerShared {
            table: Mutex::new(TimerTable {
                next_id: 0,
                timers: Vec::new(),
                running: true,
            }),
            wake: Condvar::new(),
        });

        let loop_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("host".to_string())
            .spawn(move || run_loop(&loop_shared))?;

        info!("Timer loop started");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop the host thread and wait for the callback in flight to finish
    pub fn shutdown(&self) {
        {
            let mut table = self.shared.lock();
            if !table.running {
                return;
            }
            table.running = false;
            table.timers.clear();
        }
        self.shared.wake.notify_all();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // Called from a callback; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                error!("Timer loop thread panicked");
            }
        }
        info!("Timer loop stopped");
    }
}

impl Scheduler for TimerLoop {
    fn register(&self, name: &'static str, interval: Duration, task: PeriodicTask) -> TimerId {
        let mut table = self.shared.lock();
        table.next_id += 1;
        let id = TimerId(table.next_id);
        table.timers.push(Timer {
            id,
            name,
            interval,
            next_due: Instant::now() + interval,
            task,
        });
        drop(table);
        self.shared.wake.notify_all();
        debug!("Timer {} registered every {:?}", name, interval);
        id
    }

    fn unregister(&self, id: TimerId) -> bool {
        let mut table = self.shared.lock();
        let before = table.timers.len();
        table.timers.retain(|timer| timer.id != id);
        before != table.timers.len()
    }
}

impl Drop for TimerLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &TimerShared) {
    let mut table = shared.lock();
    loop {
        if !table.running {
            break;
        }

        let now = Instant::now();
        let mut due = Vec::new();
        for timer in table.timers.iter_mut() {
            if timer.next_due <= now {
                timer.next_due = now + timer.interval;
                due.push((timer.id, timer.name, timer.task.clone()));
            }
        }

        if !due.is_empty() {
            drop(table);
            for (id, name, task) in due {
                // An earlier callback in this batch may have unregistered it.
                let still_registered = {
                    let table = shared.lock();
                    table.running && table.timers.iter().any(|timer| timer.id == id)
                };
                if !still_registered {
                    continue;
                }
                if catch_unwind(AssertUnwindSafe(|| task())).is_err() {
                    error!("Timer {} panicked", name);
                }
            }
            table = shared.lock();
            continue;
        }

        let wait = table
            .timers
            .iter()
            .map(|timer| timer.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(IDLE_WAIT);
        table = shared
            .wake
            .wait_timeout(table, wait)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .0;
    }
}
