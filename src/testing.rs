//! Test doubles shared across module tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::{PeriodicTask, Scheduler, TimerId};
use crate::live::LiveIdentifier;
use crate::obs::{ApplyError, ResourceApplier, SourceFlag};
use crate::resolver::{ChannelRef, IdentifierResolver, ResolveError};
use crate::sync::SessionSettings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedCall {
    Url(String),
    Flag(SourceFlag, bool),
}

/// Applier that records every call instead of talking to OBS
#[derive(Clone, Default)]
pub struct RecordingApplier {
    pub calls: Arc<Mutex<Vec<AppliedCall>>>,
    pub url: Arc<Mutex<String>>,
    pub missing: bool,
}

impl RecordingApplier {
    pub fn calls(&self) -> Vec<AppliedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn url_sets(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AppliedCall::Url(url) => Some(url),
                AppliedCall::Flag(..) => None,
            })
            .collect()
    }

    pub fn flag_sets(&self) -> Vec<(SourceFlag, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AppliedCall::Flag(flag, value) => Some((flag, value)),
                AppliedCall::Url(_) => None,
            })
            .collect()
    }
}

impl ResourceApplier for RecordingApplier {
    fn current_url(&mut self) -> Result<String, ApplyError> {
        if self.missing {
            return Err(ApplyError::SourceMissing("chat".into()));
        }
        Ok(self.url.lock().unwrap().clone())
    }

    fn set_url(&mut self, url: &str) -> Result<(), ApplyError> {
        if self.missing {
            return Err(ApplyError::SourceMissing("chat".into()));
        }
        *self.url.lock().unwrap() = url.to_string();
        self.calls.lock().unwrap().push(AppliedCall::Url(url.to_string()));
        Ok(())
    }

    fn set_flag(&mut self, flag: SourceFlag, value: bool) -> Result<(), ApplyError> {
        if self.missing {
            return Err(ApplyError::SourceMissing("chat".into()));
        }
        self.calls.lock().unwrap().push(AppliedCall::Flag(flag, value));
        Ok(())
    }
}

type ManualTimer = (TimerId, &'static str, Duration, PeriodicTask);

/// Scheduler whose timers only fire when a test says so
#[derive(Default)]
pub struct ManualScheduler {
    next_id: AtomicU64,
    timers: Mutex<Vec<ManualTimer>>,
    registrations: Mutex<Vec<&'static str>>,
}

impl ManualScheduler {
    /// Names of currently registered timers, in registration order
    pub fn registered(&self) -> Vec<&'static str> {
        self.timers.lock().unwrap().iter().map(|t| t.1).collect()
    }

    /// Every `register` call ever made, including ones since removed
    pub fn registrations(&self) -> Vec<&'static str> {
        self.registrations.lock().unwrap().clone()
    }

    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.timers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.1 == name)
            .map(|t| t.2)
    }

    /// Run every timer registered under `name` once
    pub fn fire(&self, name: &str) {
        let tasks: Vec<PeriodicTask> = self
            .timers
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.1 == name)
            .map(|t| t.3.clone())
            .collect();
        for task in tasks {
            task();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn register(&self, name: &'static str, interval: Duration, task: PeriodicTask) -> TimerId {
        let id = TimerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.timers.lock().unwrap().push((id, name, interval, task));
        self.registrations.lock().unwrap().push(name);
        id
    }

    fn unregister(&self, id: TimerId) -> bool {
        let mut timers = self.timers.lock().unwrap();
        let before = timers.len();
        timers.retain(|t| t.0 != id);
        timers.len() != before
    }
}

/// Resolver that replays queued results; an empty queue means not live
#[derive(Default)]
pub struct ScriptedResolver {
    probes: Mutex<VecDeque<Result<LiveIdentifier, ResolveError>>>,
    fallbacks: Mutex<VecDeque<Result<LiveIdentifier, ResolveError>>>,
    probe_calls: AtomicUsize,
    probe_times: Mutex<Vec<Instant>>,
    fallback_calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn push_probe(&self, result: Result<LiveIdentifier, ResolveError>) {
        self.probes.lock().unwrap().push_back(result);
    }

    pub fn push_fallback(&self, result: Result<LiveIdentifier, ResolveError>) {
        self.fallbacks.lock().unwrap().push_back(result);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// When each probe was made
    pub fn probe_times(&self) -> Vec<Instant> {
        self.probe_times.lock().unwrap().clone()
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }
}

impl IdentifierResolver for ScriptedResolver {
    fn probe(
        &self,
        _channel: &ChannelRef,
        _timeout: Duration,
    ) -> Result<LiveIdentifier, ResolveError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probe_times.lock().unwrap().push(Instant::now());
        self.probes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ResolveError::NotLive))
    }

    fn fallback(&self, _channel: &ChannelRef) -> Result<LiveIdentifier, ResolveError> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        self.fallbacks
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ResolveError::FallbackUnavailable))
    }

    fn has_fallback(&self) -> bool {
        !self.fallbacks.lock().unwrap().is_empty()
    }
}

pub fn id(raw: &str) -> LiveIdentifier {
    LiveIdentifier::parse(raw).unwrap()
}

/// Fast engine settings writing and reading share logs under `dir`
pub fn test_settings(dir: &Path) -> SessionSettings {
    SessionSettings {
        channel: ChannelRef::Handle("example".into()),
        device_name: "studio".into(),
        write_path: Some(dir.to_path_buf()),
        read_path: Some(dir.to_path_buf()),
        base_interval: Duration::from_millis(10),
        min_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(50),
        max_attempts: 3,
        monitor_interval: Duration::from_secs(12),
        update_interval: Duration::from_secs(23),
        refresh_interval: Duration::from_secs(10),
        probe_timeout: Duration::from_secs(1),
        join_timeout: Duration::from_secs(2),
        miss_threshold: 3,
    }
}
