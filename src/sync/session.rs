//! Session lifecycle: stream start to stream stop

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    AcquisitionController, RefreshScheduler, SessionContext, SessionSettings, SessionSignal,
    SessionState,
};
use crate::dispatch::{Dispatcher, Scheduler};
use crate::resolver::IdentifierResolver;

struct RunningSession {
    id: Uuid,
    started_at: Instant,
    ctx: Arc<SessionContext>,
    refresh: Arc<RefreshScheduler>,
}

/// Owner of at most one running session.
///
/// Host-level collaborators (dispatcher, scheduler, resolver) outlive
/// sessions; everything identifier-related is rebuilt on each start.
pub struct Session {
    settings: SessionSettings,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<dyn Scheduler>,
    resolver: Arc<dyn IdentifierResolver>,
    state_tx: Arc<watch::Sender<SessionState>>,
    running: Mutex<Option<RunningSession>>,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<dyn Scheduler>,
        resolver: Arc<dyn IdentifierResolver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            settings,
            dispatcher,
            scheduler,
            resolver,
            state_tx: Arc::new(state_tx),
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningSession>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch session state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn handle(&self, signal: SessionSignal) {
        match signal {
            SessionSignal::Started => {
                self.start();
            }
            SessionSignal::Stopped => {
                self.stop();
            }
        }
    }

    /// Begin a session and launch acquisition. Ignored unless idle.
    pub fn start(&self) -> bool {
        let mut running = self.lock_running();
        if running.is_some() {
            info!("Session already running ({:?}), ignoring start", self.state());
            return false;
        }

        let id = Uuid::new_v4();
        let ctx = Arc::new(SessionContext::new(
            self.settings.clone(),
            self.dispatcher.clone(),
            self.resolver.clone(),
        ));
        let refresh = Arc::new(RefreshScheduler::new(ctx.clone(), self.scheduler.clone()));

        self.state_tx.send_replace(SessionState::Acquiring);
        self.dispatcher.start();
        info!("Session {} started for {}", id, self.settings.channel);

        let controller =
            AcquisitionController::new(ctx.clone(), refresh.clone(), self.state_tx.clone());
        if !ctx.spawn_worker("acquisition", move || {
            controller.run();
        }) {
            warn!("Session {} could not start acquisition", id);
        }

        *running = Some(RunningSession {
            id,
            started_at: Instant::now(),
            ctx,
            refresh,
        });
        true
    }

    /// Tear the running session down. Ignored when idle.
    ///
    /// Workers get a bounded join; queued host tasks are discarded, not run.
    pub fn stop(&self) -> bool {
        let Some(session) = self.lock_running().take() else {
            info!("No session running, ignoring stop");
            return false;
        };

        self.state_tx.send_replace(SessionState::Stopping);
        info!("Stopping session {}", session.id);

        session.ctx.shutdown.trigger();
        session.refresh.stop();
        self.dispatcher.stop();
        session.ctx.join_workers(self.settings.join_timeout);

        info!(
            "Session {} ended after {:.1}s (API quota used: {})",
            session.id,
            session.started_at.elapsed().as_secs_f64(),
            self.resolver.quota_used()
        );
        self.state_tx.send_replace(SessionState::Idle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{id, test_settings, ManualScheduler, RecordingApplier, ScriptedResolver};
    use std::time::Duration;

    struct Fixture {
        session: Session,
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<ManualScheduler>,
        resolver: Arc<ScriptedResolver>,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(ManualScheduler::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Box::new(RecordingApplier::default()),
            scheduler.clone(),
            Duration::from_millis(33),
        ));
        let resolver = Arc::new(ScriptedResolver::default());
        let session = Session::new(
            test_settings(dir.path()),
            dispatcher.clone(),
            scheduler.clone(),
            resolver.clone(),
        );
        Fixture {
            session,
            dispatcher,
            scheduler,
            resolver,
            dir,
        }
    }

    fn wait_for(session: &Session, want: SessionState) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if session.state() == want {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_start_and_stop_transitions() {
        let f = fixture();
        let rx = f.session.subscribe();
        assert_eq!(f.session.state(), SessionState::Idle);

        f.resolver.push_probe(Ok(id("dQw4w9WgXcQ")));
        assert!(f.session.start());
        assert!(wait_for(&f.session, SessionState::Active));
        assert!(f.dispatcher.is_active());
        assert_eq!(f.dispatcher.pending(), 4);

        assert!(f.session.stop());
        assert_eq!(*rx.borrow(), SessionState::Idle);
        assert!(!f.dispatcher.is_active());
        assert_eq!(f.dispatcher.pending(), 0);
        assert!(f.scheduler.registered().is_empty());
    }

    #[test]
    fn test_duplicate_signals_are_ignored() {
        let f = fixture();
        assert!(!f.session.stop());

        f.session.handle(SessionSignal::Started);
        assert!(!f.session.start());
        assert_ne!(f.session.state(), SessionState::Idle);

        f.session.handle(SessionSignal::Stopped);
        assert_eq!(f.session.state(), SessionState::Idle);
        assert!(!f.session.stop());
    }

    #[test]
    fn test_stop_cancels_acquisition_backoff() {
        let f = fixture();
        let mut settings = test_settings(f.dir.path());
        settings.base_interval = Duration::from_secs(30);
        settings.min_interval = Duration::from_secs(30);
        settings.max_interval = Duration::from_secs(60);
        let session = Session::new(
            settings,
            f.dispatcher.clone(),
            f.scheduler.clone(),
            f.resolver.clone(),
        );

        session.start();
        let deadline = Instant::now() + Duration::from_secs(5);
        while f.resolver.probe_calls() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        session.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(f.resolver.probe_calls(), 1);
    }

    #[test]
    fn test_restart_uses_fresh_state() {
        let f = fixture();
        f.resolver.push_probe(Ok(id("aaaaaaaaaaa")));
        f.session.start();
        assert!(wait_for(&f.session, SessionState::Active));
        f.session.stop();

        f.session.start();
        assert!(f.dispatcher.is_active());
        assert_eq!(f.scheduler.registered(), vec!["dispatch"]);
        f.session.stop();
        assert_eq!(f.scheduler.registrations(), vec!["dispatch", "dispatch"]);
    }
}
