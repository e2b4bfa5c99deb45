//! Primary/pending identifier handoff between probe workers and the host

use std::sync::{Mutex, MutexGuard};

use super::LiveIdentifier;

/// Why a probe came back without a usable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The channel page answered but showed nothing live
    NotLive,
    /// The request ran past its timeout
    Timeout,
    /// The remote end could not be reached
    Connection,
}

/// Strength of the periodic browser-source nudge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTier {
    /// Toggle the cache-refresh flag
    Soft,
    /// Toggle restart-when-active
    Full,
    /// Toggle the shutdown flag, forcing a reload
    Hard,
}

impl RefreshTier {
    /// Pick the nudge strength for the most recent probe outcome.
    ///
    /// `consecutive_misses` counts failed probes since the last success;
    /// plain misses only escalate once they reach `miss_threshold`.
    pub fn select(
        last_failure: Option<FailureCategory>,
        consecutive_misses: u32,
        miss_threshold: u32,
    ) -> Self {
        match last_failure {
            None => RefreshTier::Soft,
            Some(FailureCategory::NotLive) if consecutive_misses >= miss_threshold => {
                RefreshTier::Full
            }
            Some(FailureCategory::NotLive) => RefreshTier::Soft,
            Some(FailureCategory::Timeout) => RefreshTier::Full,
            Some(FailureCategory::Connection) => RefreshTier::Hard,
        }
    }
}

/// Result of a successful `promote_pending`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub previous: Option<LiveIdentifier>,
    pub current: LiveIdentifier,
}

#[derive(Debug, Default)]
struct Slots {
    primary: Option<LiveIdentifier>,
    pending: Option<LiveIdentifier>,
    last_failure: Option<FailureCategory>,
    consecutive_misses: u32,
}

/// Thread-safe holder of the applied and not-yet-applied identifiers.
///
/// Every read-compare-write happens under the one lock, so two promoters
/// can never both observe the same pending value.
#[derive(Debug)]
pub struct StateStore {
    slots: Mutex<Slots>,
    miss_threshold: u32,
}

impl StateStore {
    pub fn new(miss_threshold: u32) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            miss_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A poisoned lock still holds consistent slots: every writer
        // finishes its assignments before anything can panic.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unconditional overwrite, used once at first acquisition
    pub fn set_primary(&self, id: LiveIdentifier) {
        self.lock().primary = Some(id);
    }

    /// Last probe wins; an unconsumed earlier value is replaced
    pub fn set_pending(&self, id: LiveIdentifier) {
        self.lock().pending = Some(id);
    }

    /// Move pending into primary if it differs.
    ///
    /// Returns `None` when there is nothing to apply. A pending value equal
    /// to primary is left in place and reported as no change.
    pub fn promote_pending(&self) -> Option<Promotion> {
        let mut slots = self.lock();
        let pending = slots.pending.as_ref()?;
        if slots.primary.as_ref() == Some(pending) {
            return None;
        }
        let current = slots.pending.take()?;
        let previous = slots.primary.replace(current.clone());
        Some(Promotion { previous, current })
    }

    /// Pending if present, else primary
    pub fn current(&self) -> Option<LiveIdentifier> {
        let slots = self.lock();
        slots.pending.clone().or_else(|| slots.primary.clone())
    }

    /// The identifier actually applied to the resource
    pub fn primary(&self) -> Option<LiveIdentifier> {
        self.lock().primary.clone()
    }

    pub fn record_probe_success(&self) {
        let mut slots = self.lock();
        slots.last_failure = None;
        slots.consecutive_misses = 0;
    }

    pub fn record_probe_failure(&self, category: FailureCategory) {
        let mut slots = self.lock();
        slots.last_failure = Some(category);
        slots.consecutive_misses = slots.consecutive_misses.saturating_add(1);
    }

    /// Consume the escalation state and return the tier it selects.
    ///
    /// The failure category is cleared; the miss counter is kept so that
    /// repeated misses keep escalating until a probe succeeds.
    pub fn take_refresh_tier(&self) -> RefreshTier {
        let mut slots = self.lock();
        RefreshTier::select(
            slots.last_failure.take(),
            slots.consecutive_misses,
            self.miss_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn id(s: &str) -> LiveIdentifier {
        LiveIdentifier::parse(s).unwrap()
    }

    #[test]
    fn test_last_pending_wins() {
        let store = StateStore::new(3);
        store.set_primary(id("aaaaaaaaaaa"));
        store.set_pending(id("bbbbbbbbbbb"));
        store.set_pending(id("ccccccccccc"));
        store.set_pending(id("ddddddddddd"));

        let promotion = store.promote_pending().unwrap();
        assert_eq!(promotion.previous, Some(id("aaaaaaaaaaa")));
        assert_eq!(promotion.current, id("ddddddddddd"));
        assert_eq!(store.primary(), Some(id("ddddddddddd")));
    }

    #[test]
    fn test_second_promote_is_noop() {
        let store = StateStore::new(3);
        store.set_pending(id("bbbbbbbbbbb"));
        assert!(store.promote_pending().is_some());
        assert!(store.promote_pending().is_none());
    }

    #[test]
    fn test_pending_equal_to_primary_is_not_a_change() {
        let store = StateStore::new(3);
        store.set_primary(id("aaaaaaaaaaa"));
        store.set_pending(id("aaaaaaaaaaa"));
        assert!(store.promote_pending().is_none());
        assert_eq!(store.primary(), Some(id("aaaaaaaaaaa")));
    }

    #[test]
    fn test_current_prefers_pending() {
        let store = StateStore::new(3);
        assert_eq!(store.current(), None);
        store.set_primary(id("aaaaaaaaaaa"));
        assert_eq!(store.current(), Some(id("aaaaaaaaaaa")));
        store.set_pending(id("bbbbbbbbbbb"));
        assert_eq!(store.current(), Some(id("bbbbbbbbbbb")));
        assert_eq!(store.primary(), Some(id("aaaaaaaaaaa")));
    }

    #[test]
    fn test_concurrent_promoters_apply_once() {
        let store = Arc::new(StateStore::new(3));
        store.set_primary(id("aaaaaaaaaaa"));
        store.set_pending(id("bbbbbbbbbbb"));
        let applied = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let applied = applied.clone();
                std::thread::spawn(move || {
                    if store.promote_pending().is_some() {
                        applied.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert_eq!(store.primary(), Some(id("bbbbbbbbbbb")));
    }

    #[test]
    fn test_tier_selection() {
        use FailureCategory::*;
        assert_eq!(RefreshTier::select(None, 0, 3), RefreshTier::Soft);
        assert_eq!(RefreshTier::select(Some(NotLive), 1, 3), RefreshTier::Soft);
        assert_eq!(RefreshTier::select(Some(NotLive), 3, 3), RefreshTier::Full);
        assert_eq!(RefreshTier::select(Some(Timeout), 1, 3), RefreshTier::Full);
        assert_eq!(RefreshTier::select(Some(Connection), 1, 3), RefreshTier::Hard);
    }

    #[test]
    fn test_refresh_tier_is_consumed_and_reset_by_success() {
        let store = StateStore::new(3);
        store.record_probe_failure(FailureCategory::Connection);
        assert_eq!(store.take_refresh_tier(), RefreshTier::Hard);
        assert_eq!(store.take_refresh_tier(), RefreshTier::Soft);

        store.record_probe_failure(FailureCategory::Timeout);
        store.record_probe_success();
        assert_eq!(store.take_refresh_tier(), RefreshTier::Soft);
    }
}
