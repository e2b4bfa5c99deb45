//! Single-context task queue for browser-source mutations
//!
//! Workers post closures from any thread; the host loop drains whatever is
//! due on each tick. Tasks are the only code that ever receives the
//! [`ResourceApplier`], so every mutation happens on the host thread, in
//! due-time order, FIFO for equal due-times.

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{Scheduler, TimerId};
use crate::obs::{ApplyError, ResourceApplier};

/// Monotonic id handed back by [`Dispatcher::post`]
pub type TaskId = u64;

type TaskAction = Box<dyn FnOnce(&mut dyn ResourceApplier) -> Result<()> + Send>;

/// Upper bound on tasks run by one tick
pub const MAX_TASKS_PER_TICK: usize = 16;

struct Task {
    id: TaskId,
    label: String,
    due: Instant,
    enqueued_at: Instant,
    action: TaskAction,
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.id == other.id
    }
}

impl Eq for Task {}

#[derive(Default)]
struct Queue {
    tasks: BinaryHeap<Task>,
    next_id: TaskId,
    active: bool,
    timer: Option<TimerId>,
}

/// Lifecycle and queue tasks get info-level logging, the rest debug
fn is_important(label: &str) -> bool {
    label.starts_with("start_")
        || label.starts_with("stop_")
        || label == "init:apply_url"
        || label == "apply_url_to_source"
}

pub struct Dispatcher {
    queue: Mutex<Queue>,
    applier: Mutex<Box<dyn ResourceApplier>>,
    scheduler: Arc<dyn Scheduler>,
    interval: Duration,
}

impl Dispatcher {
    pub fn new(
        applier: Box<dyn ResourceApplier>,
        scheduler: Arc<dyn Scheduler>,
        interval: Duration,
    ) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            applier: Mutex::new(applier),
            scheduler,
            interval,
        }
    }

    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the tick with the scheduler. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut queue = self.lock_queue();
        if queue.active {
            return;
        }
        queue.active = true;

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = self.scheduler.register(
            "dispatch",
            self.interval,
            Arc::new(move || {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.tick();
                }
            }),
        );
        queue.timer = Some(timer);
        info!("Dispatcher started (interval={:?})", self.interval);
    }

    /// Unregister the tick and discard every queued task. Idempotent.
    pub fn stop(&self) {
        let mut queue = self.lock_queue();
        if !queue.active {
            return;
        }
        queue.active = false;
        if let Some(timer) = queue.timer.take() {
            self.scheduler.unregister(timer);
        }
        let discarded = queue.tasks.len();
        queue.tasks.clear();
        drop(queue);
        info!("Dispatcher stopped ({} queued tasks discarded)", discarded);
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.lock_queue().active
    }

    /// Number of tasks waiting to run
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.lock_queue().tasks.len()
    }

    /// Queue `action` to run on the host thread no earlier than `delay` from now.
    ///
    /// Safe from any thread and never blocks on task execution. A stopped
    /// dispatcher drops the task so stale work never reaches a later session.
    pub fn post<F>(&self, label: impl Into<String>, delay: Duration, action: F) -> TaskId
    where
        F: FnOnce(&mut dyn ResourceApplier) -> Result<()> + Send + 'static,
    {
        let label = label.into();
        let now = Instant::now();
        let mut queue = self.lock_queue();
        queue.next_id += 1;
        let id = queue.next_id;

        if !queue.active {
            debug!("Dispatcher stopped, dropping task #{}: {}", id, label);
            return id;
        }

        let important = is_important(&label);
        if important {
            info!("Queued task #{}: {}, delay={:?}", id, label, delay);
        } else {
            debug!("Queued task #{}: {}, delay={:?}", id, label, delay);
        }
        queue.tasks.push(Task {
            id,
            label,
            due: now + delay,
            enqueued_at: now,
            action: Box::new(action),
        });
        id
    }

    /// Run due tasks; called by the host loop
    pub fn tick(&self) -> usize {
        self.tick_at(Instant::now())
    }

    /// Run up to [`MAX_TASKS_PER_TICK`] tasks due at `now`.
    ///
    /// The applier lock is held for the whole batch, so ticks never overlap
    /// and batches run in queue order.
    pub fn tick_at(&self, now: Instant) -> usize {
        let mut applier = self
            .applier
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let batch = {
            let mut queue = self.lock_queue();
            let mut batch = Vec::new();
            while batch.len() < MAX_TASKS_PER_TICK {
                match queue.tasks.peek() {
                    Some(task) if task.due <= now => {}
                    _ => break,
                }
                if let Some(task) = queue.tasks.pop() {
                    batch.push(task);
                }
            }
            batch
        };

        let executed = batch.len();
        for task in batch {
            let Task {
                id,
                label,
                enqueued_at,
                action,
                ..
            } = task;

            if is_important(&label) {
                info!(
                    "Running task #{}: {}, waited={}ms",
                    id,
                    label,
                    enqueued_at.elapsed().as_millis()
                );
            }

            let applier: &mut dyn ResourceApplier = applier.as_mut();
            match catch_unwind(AssertUnwindSafe(|| action(applier))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => match e.downcast_ref::<ApplyError>() {
                    Some(ApplyError::SourceMissing(name)) => {
                        warn!("Task #{} ({}) skipped: browser source missing: {}", id, label, name);
                    }
                    _ => error!("Task #{} ({}) failed: {:#}", id, label, e),
                },
                Err(_) => error!("Task #{} ({}) panicked", id, label),
            }
        }

        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualScheduler, RecordingApplier};

    fn dispatcher() -> (Arc<Dispatcher>, RecordingApplier, Arc<ManualScheduler>) {
        let applier = RecordingApplier::default();
        let scheduler = Arc::new(ManualScheduler::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Box::new(applier.clone()),
            scheduler.clone(),
            Duration::from_millis(33),
        ));
        dispatcher.start();
        (dispatcher, applier, scheduler)
    }

    #[test]
    fn test_important_labels() {
        for label in [
            "start_monitor_timer",
            "stop_monitor_timer",
            "init:apply_url",
            "apply_url_to_source",
        ] {
            assert!(is_important(label), "{label}");
        }
        for label in ["refresh_source", "refresh_source:restore", "debug:refresh_now"] {
            assert!(!is_important(label), "{label}");
        }
    }

    #[test]
    fn test_runs_in_due_order_regardless_of_post_order() {
        let (dispatcher, _, _) = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        dispatcher.post("slow", Duration::from_millis(500), move |_| {
            o.lock().unwrap().push("slow");
            Ok(())
        });
        let o = order.clone();
        dispatcher.post("fast", Duration::from_millis(100), move |_| {
            o.lock().unwrap().push("fast");
            Ok(())
        });

        assert_eq!(dispatcher.tick_at(Instant::now() + Duration::from_secs(1)), 2);
        assert_eq!(*order.lock().unwrap(), vec!["fast", "slow"]);
    }

    #[test]
    fn test_tasks_wait_for_due_time() {
        let (dispatcher, _, _) = dispatcher();
        let now = Instant::now();
        dispatcher.post("later", Duration::from_millis(500), |_| Ok(()));
        dispatcher.post("soon", Duration::from_millis(100), |_| Ok(()));

        assert_eq!(dispatcher.tick_at(now), 0);
        assert_eq!(dispatcher.tick_at(now + Duration::from_millis(300)), 1);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn test_equal_due_times_keep_post_order() {
        let (dispatcher, _, _) = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let o = order.clone();
            dispatcher.post(format!("task-{i}"), Duration::ZERO, move |_| {
                o.lock().unwrap().push(i);
                Ok(())
            });
        }
        dispatcher.tick_at(Instant::now() + Duration::from_millis(1));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_batch_is_bounded() {
        let (dispatcher, _, _) = dispatcher();
        for _ in 0..(MAX_TASKS_PER_TICK + 4) {
            dispatcher.post("bulk", Duration::ZERO, |_| Ok(()));
        }
        let later = Instant::now() + Duration::from_millis(1);
        assert_eq!(dispatcher.tick_at(later), MAX_TASKS_PER_TICK);
        assert_eq!(dispatcher.tick_at(later), 4);
    }

    #[test]
    fn test_failing_task_does_not_stop_the_batch() {
        let (dispatcher, applier, _) = dispatcher();
        dispatcher.post("fails", Duration::ZERO, |_| anyhow::bail!("broken"));
        dispatcher.post("panics", Duration::ZERO, |_| panic!("boom"));
        dispatcher.post("apply_url_to_source", Duration::ZERO, |a| {
            a.set_url("https://example.com")?;
            Ok(())
        });

        assert_eq!(dispatcher.tick_at(Instant::now() + Duration::from_millis(1)), 3);
        assert_eq!(applier.url_sets(), vec!["https://example.com".to_string()]);
    }

    #[test]
    fn test_stop_discards_queue_and_rejects_posts() {
        let (dispatcher, applier, scheduler) = dispatcher();
        assert_eq!(scheduler.registered(), vec!["dispatch"]);

        dispatcher.post("queued", Duration::ZERO, |a| {
            a.set_url("stale")?;
            Ok(())
        });
        dispatcher.stop();
        dispatcher.stop();
        assert!(scheduler.registered().is_empty());
        assert_eq!(dispatcher.pending(), 0);

        let first = dispatcher.post("late", Duration::ZERO, |a| {
            a.set_url("late")?;
            Ok(())
        });
        let second = dispatcher.post("later", Duration::ZERO, |_| Ok(()));
        assert!(second > first);
        assert_eq!(dispatcher.tick_at(Instant::now() + Duration::from_secs(1)), 0);
        assert!(applier.calls().is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (dispatcher, _, scheduler) = dispatcher();
        dispatcher.start();
        assert_eq!(scheduler.registered(), vec!["dispatch"]);
        scheduler.fire("dispatch");
    }
}
