//! Periodic monitor, update and refresh tasks for an active session
//!
//! - **monitor** promotes a pending identifier onto the browser source and
//!   tails the peer share log.
//! - **update** re-probes the channel page and stores any new identifier as
//!   pending. It also records the outcome for refresh escalation.
//! - **refresh** nudges the browser source, harder after worse failures.
//!
//! Each task is single-flight: a tick that finds its previous run still in
//! progress is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SessionContext;
use crate::dispatch::{Scheduler, TimerId};
use crate::live::RefreshTier;
use crate::obs::SourceFlag;
use crate::share::{ChatRelay, PeerLogTail, ShareRecord};

/// Flag, kick value, and delay before the flag is restored
fn nudge_plan(tier: RefreshTier) -> (SourceFlag, bool, Duration) {
    match tier {
        RefreshTier::Soft => (SourceFlag::RefreshCache, true, Duration::from_millis(80)),
        RefreshTier::Full => (SourceFlag::RestartWhenActive, false, Duration::from_millis(200)),
        RefreshTier::Hard => (SourceFlag::Shutdown, true, Duration::from_millis(200)),
    }
}

/// Clears a single-flight flag when dropped, so every exit path releases it
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag.clone()))
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct Timers {
    monitor: Option<TimerId>,
    update: Option<TimerId>,
    refresh: Option<TimerId>,
}

struct PeerWatch {
    tail: PeerLogTail,
    relay: ChatRelay,
}

pub struct RefreshScheduler {
    ctx: Arc<SessionContext>,
    scheduler: Arc<dyn Scheduler>,
    timers: Mutex<Timers>,
    peer: Mutex<PeerWatch>,
    monitor_in_flight: Arc<AtomicBool>,
    update_in_flight: Arc<AtomicBool>,
    refresh_in_flight: Arc<AtomicBool>,
}

impl RefreshScheduler {
    pub fn new(ctx: Arc<SessionContext>, scheduler: Arc<dyn Scheduler>) -> Self {
        let settings = &ctx.settings;
        let tail = PeerLogTail::new(settings.read_path.as_deref(), &settings.device_name);
        Self {
            scheduler,
            timers: Mutex::new(Timers::default()),
            peer: Mutex::new(PeerWatch {
                tail,
                relay: ChatRelay::new(),
            }),
            monitor_in_flight: Arc::new(AtomicBool::new(false)),
            update_in_flight: Arc::new(AtomicBool::new(false)),
            refresh_in_flight: Arc::new(AtomicBool::new(false)),
            ctx,
        }
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `run` under `name` unless `slot` already holds a timer
    fn start_timer(
        self: &Arc<Self>,
        name: &'static str,
        interval: Duration,
        slot: fn(&mut Timers) -> &mut Option<TimerId>,
        run: fn(&Arc<Self>),
    ) {
        let mut timers = self.lock_timers();
        if self.ctx.shutdown.is_set() {
            debug!("Session stopping, not starting {} timer", name);
            return;
        }
        let slot = slot(&mut *timers);
        if slot.is_some() {
            debug!("{} timer already running", name);
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = self.scheduler.register(
            name,
            interval,
            Arc::new(move || {
                if let Some(refresh) = weak.upgrade() {
                    run(&refresh);
                }
            }),
        );
        *slot = Some(id);
        info!("{} timer started (interval={:?})", name, interval);
    }

    pub fn start_monitor(self: &Arc<Self>) {
        let interval = self.ctx.settings.monitor_interval;
        self.start_timer("monitor", interval, |t| &mut t.monitor, Self::spawn_monitor);
    }

    pub fn start_update(self: &Arc<Self>) {
        let interval = self.ctx.settings.update_interval;
        self.start_timer("update", interval, |t| &mut t.update, Self::spawn_update);
    }

    pub fn start_refresh(self: &Arc<Self>) {
        let interval = self.ctx.settings.refresh_interval;
        self.start_timer("refresh", interval, |t| &mut t.refresh, |r| r.refresh_once());
    }

    /// Unregister every timer. Idempotent.
    pub fn stop(&self) {
        let mut timers = self.lock_timers();
        let ids = [
            ("monitor", timers.monitor.take()),
            ("update", timers.update.take()),
            ("refresh", timers.refresh.take()),
        ];
        for (name, id) in ids {
            if let Some(id) = id {
                self.scheduler.unregister(id);
                info!("{} timer stopped", name);
            }
        }
    }

    fn spawn_monitor(self: &Arc<Self>) {
        if self.ctx.shutdown.is_set() {
            return;
        }
        let Some(guard) = InFlight::acquire(&self.monitor_in_flight) else {
            debug!("Monitor still running, skipping tick");
            return;
        };
        let refresh = self.clone();
        self.ctx.spawn_worker("monitor", move || {
            let _guard = guard;
            refresh.monitor_once();
        });
    }

    fn spawn_update(self: &Arc<Self>) {
        if self.ctx.shutdown.is_set() {
            return;
        }
        let Some(guard) = InFlight::acquire(&self.update_in_flight) else {
            debug!("Update probe still in flight, skipping tick");
            return;
        };
        let refresh = self.clone();
        self.ctx.spawn_worker("update-probe", move || {
            let _guard = guard;
            refresh.update_once();
        });
    }

    /// Apply a pending identifier and check the peer log
    pub fn monitor_once(&self) {
        let ctx = &self.ctx;
        if ctx.shutdown.is_set() {
            return;
        }

        if let Some(promotion) = ctx.store.promote_pending() {
            info!(
                "Live video changed: {} -> {}",
                promotion
                    .previous
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("none"),
                promotion.current
            );

            let url = promotion.current.popout_url();
            ctx.dispatcher
                .post("apply_url_to_source", Duration::ZERO, move |applier| {
                    applier.set_url(&url)?;
                    info!("Browser source updated to {}", url);
                    Ok(())
                });

            let record = ShareRecord::new(&promotion.current, &ctx.settings.device_name);
            if let Err(e) = ctx.share_log.append(&record) {
                warn!("Failed to write share record: {:#}", e);
            }
        }

        let mut peer = self.peer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let PeerWatch { tail, relay } = &mut *peer;
        if let Some(record) = tail.poll() {
            relay.offer(&record.share_link);
        }
    }

    /// Probe the channel page once and stage any new identifier
    pub fn update_once(&self) {
        let ctx = &self.ctx;
        if ctx.shutdown.is_set() {
            return;
        }

        let result = ctx
            .resolver
            .probe(&ctx.settings.channel, ctx.settings.probe_timeout);
        if ctx.shutdown.is_set() {
            return;
        }

        match result {
            Ok(id) => {
                ctx.store.record_probe_success();
                if ctx.store.current().as_ref() == Some(&id) {
                    debug!("Live video unchanged: {}", id);
                } else {
                    info!("New live video detected: {}", id);
                    ctx.store.set_pending(id);
                }
            }
            Err(e) => {
                debug!("Update probe failed ({:?}): {}", e.category(), e);
                ctx.store.record_probe_failure(e.category());
            }
        }
    }

    /// Queue one two-step nudge of the browser source
    pub fn refresh_once(&self) {
        let ctx = &self.ctx;
        if ctx.shutdown.is_set() {
            return;
        }
        let Some(primary) = ctx.store.primary() else {
            debug!("No live video applied yet, skipping refresh");
            return;
        };
        let Some(guard) = InFlight::acquire(&self.refresh_in_flight) else {
            debug!("Previous refresh still in progress, skipping tick");
            return;
        };

        let tier = ctx.store.take_refresh_tier();
        let (flag, kick, restore_after) = nudge_plan(tier);
        let expected_url = primary.popout_url();
        let dispatcher = ctx.dispatcher.clone();

        ctx.dispatcher
            .post("refresh_source", Duration::ZERO, move |applier| {
                let current = applier.current_url()?;
                if current != expected_url {
                    info!("Browser source URL was {}, restoring {}", current, expected_url);
                    applier.set_url(&expected_url)?;
                }

                applier.set_flag(flag, kick)?;
                debug!("{:?} refresh: {} = {}", tier, flag.setting_key(), kick);

                dispatcher.post("refresh_source:restore", restore_after, move |applier| {
                    let _guard = guard;
                    applier.set_flag(flag, !kick)?;
                    debug!("{:?} refresh: {} = {}", tier, flag.setting_key(), !kick);
                    Ok(())
                });
                Ok(())
            });
    }
}
