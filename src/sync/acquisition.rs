//! First live-identifier acquisition with bounded retries

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{RefreshScheduler, SessionContext, SessionState};
use crate::live::LiveIdentifier;
use crate::resolver::ResolveError;
use crate::share::ShareRecord;

const BACKOFF_FACTOR: f64 = 1.5;
/// Compounding steps before the multiplier stops growing
const MAX_BACKOFF_STEPS: u32 = 5;

const START_MONITOR_DELAY: Duration = Duration::from_millis(500);
const START_REFRESH_DELAY: Duration = Duration::from_millis(900);
const START_UPDATE_DELAY: Duration = Duration::from_millis(1300);

/// Interval for an attempt made after `failures` consecutive failures
pub fn next_backoff(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base;
    }
    let steps = failures.min(MAX_BACKOFF_STEPS) as i32;
    base.mul_f64(BACKOFF_FACTOR.powi(steps)).min(max)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    Acquired(LiveIdentifier),
    /// Every attempt failed; the session stays up but undriven
    Exhausted,
    Cancelled,
}

pub struct AcquisitionController {
    ctx: Arc<SessionContext>,
    refresh: Arc<RefreshScheduler>,
    state_tx: Arc<watch::Sender<SessionState>>,
}

impl AcquisitionController {
    pub fn new(
        ctx: Arc<SessionContext>,
        refresh: Arc<RefreshScheduler>,
        state_tx: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        Self {
            ctx,
            refresh,
            state_tx,
        }
    }

    /// Blocking acquisition loop; run it on a background worker
    pub fn run(&self) -> AcquisitionOutcome {
        let settings = &self.ctx.settings;
        let mut failures: u32 = 0;

        for attempt in 1..=settings.max_attempts {
            if self.ctx.shutdown.is_set() {
                info!("Acquisition cancelled before attempt {}", attempt);
                return AcquisitionOutcome::Cancelled;
            }

            let started = Instant::now();
            let interval = next_backoff(settings.base_interval, settings.max_interval, failures);
            info!(
                "Acquisition attempt {}/{} for {}",
                attempt, settings.max_attempts, settings.channel
            );

            match self.attempt() {
                Ok(id) => {
                    if self.ctx.shutdown.is_set() {
                        info!("Acquired {} but session is stopping, discarding", id);
                        return AcquisitionOutcome::Cancelled;
                    }
                    self.on_acquired(&id);
                    return AcquisitionOutcome::Acquired(id);
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "Acquisition attempt {} failed ({:?}): {}",
                        attempt,
                        e.category(),
                        e
                    );
                }
            }

            if attempt == settings.max_attempts {
                break;
            }

            let wait = interval
                .saturating_sub(started.elapsed())
                .max(settings.min_interval);
            info!("Next acquisition attempt in {:.2}s", wait.as_secs_f64());
            if self.ctx.shutdown.wait_timeout(wait) {
                info!("Acquisition cancelled during backoff");
                return AcquisitionOutcome::Cancelled;
            }
        }

        error!(
            "No live video found for {} after {} attempts; waiting for the next stream start",
            settings.channel, settings.max_attempts
        );
        AcquisitionOutcome::Exhausted
    }

    /// Page probe first, then the quota-spending fallback if there is one
    fn attempt(&self) -> Result<LiveIdentifier, ResolveError> {
        let settings = &self.ctx.settings;
        let resolver = &self.ctx.resolver;

        let probe_error = match resolver.probe(&settings.channel, settings.probe_timeout) {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };
        if !resolver.has_fallback() || self.ctx.shutdown.is_set() {
            return Err(probe_error);
        }

        info!("Page probe failed ({}), trying API fallback", probe_error);
        resolver.fallback(&settings.channel)
    }

    fn on_acquired(&self, id: &LiveIdentifier) {
        let ctx = &self.ctx;
        ctx.store.set_primary(id.clone());
        info!("Live video acquired: {}", id);

        let url = id.popout_url();
        ctx.dispatcher.post("init:apply_url", Duration::ZERO, move |applier| {
            applier.set_url(&url)?;
            info!("Browser source set to {}", url);
            Ok(())
        });

        let record = ShareRecord::new(id, &ctx.settings.device_name);
        if let Err(e) = ctx.share_log.append(&record) {
            warn!("Failed to write share record: {:#}", e);
        }

        let refresh = self.refresh.clone();
        ctx.dispatcher
            .post("start_monitor_timer", START_MONITOR_DELAY, move |_| {
                refresh.start_monitor();
                Ok(())
            });
        let refresh = self.refresh.clone();
        ctx.dispatcher
            .post("start_refresh_timer", START_REFRESH_DELAY, move |_| {
                refresh.start_refresh();
                Ok(())
            });
        let refresh = self.refresh.clone();
        ctx.dispatcher
            .post("start_update_timer", START_UPDATE_DELAY, move |_| {
                refresh.start_update();
                Ok(())
            });

        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Acquiring {
                *state = SessionState::Active;
                true
            } else {
                false
            }
        });
    }
}
