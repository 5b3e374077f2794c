//! Broadcast deduplication.
//!
//! Insteon devices repeat every broadcast and cleanup across the mesh, so one button
//! press arrives several times with falling hop counts. [`BroadcastDeduplicator`]
//! keeps the last accepted copy per `(address, operation, group)` and decides whether
//! a new copy is a fresh event or a repeat.
//!
//! [`CleanupFilter`] is the second layer: after an all-link broadcast fires, the
//! directed cleanups that follow for the same group are the same event. Only the
//! last event fired for a device group counts, so a press of a different kind in
//! between lets a late cleanup through.
//!
//! Both tables expire entries after a TTL and evict oldest-first at capacity.

use crate::core::address::Address;
use crate::utils::time::SharedClock;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Default window for a same-hops repeat.
pub const SHORT_THRESHOLD: Duration = Duration::from_millis(700);
/// After this long any copy counts as a new event.
pub const LONG_THRESHOLD: Duration = Duration::from_secs(2);
/// Window in which a cleanup echoes an earlier broadcast.
pub const CLEANUP_WINDOW: Duration = Duration::from_secs(25);
/// Entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
/// Entry cap.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Identity of a repeated event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub address: Address,
    pub name: &'static str,
    pub group: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Seen {
    at: Instant,
    hops_left: u8,
}

/// Last event fired for one device group.
#[derive(Debug, Clone, Copy)]
struct Fired {
    name: &'static str,
    at: Instant,
    broadcast: bool,
}

/// TTL-bounded map with FIFO eviction.
#[derive(Debug)]
struct ExpiringMap<K, V> {
    entries: HashMap<K, V>,
    insertion_order: VecDeque<K>,
    max_entries: usize,
}

impl<K: Clone + Eq + Hash + std::fmt::Debug, V> ExpiringMap<K, V> {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn retain(&mut self, keep: impl Fn(&V) -> bool) {
        let before = self.entries.len();
        self.entries.retain(|_, value| keep(value));
        if self.entries.len() != before {
            let entries = &self.entries;
            self.insertion_order.retain(|key| entries.contains_key(key));
            debug!(removed = before - self.entries.len(), "Expired dedup entries");
        }
    }

    fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            // refreshed entries move to the back of the eviction queue
            self.insertion_order.retain(|k| k != &key);
        } else if self.entries.len() > self.max_entries {
            if let Some(oldest) = self.insertion_order.pop_front() {
                self.entries.remove(&oldest);
                trace!(?oldest, "Evicted dedup entry at capacity");
            }
        }
        self.insertion_order.push_back(key);
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }
}

/// Thresholds for [`BroadcastDeduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSettings {
    pub short_threshold: Duration,
    pub long_threshold: Duration,
    pub cleanup_window: Duration,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            short_threshold: SHORT_THRESHOLD,
            long_threshold: LONG_THRESHOLD,
            cleanup_window: CLEANUP_WINDOW,
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// First-layer filter over repeated copies of one event.
#[derive(Debug)]
pub struct BroadcastDeduplicator {
    seen: ExpiringMap<DedupKey, Seen>,
    settings: DedupSettings,
    clock: SharedClock,
}

impl BroadcastDeduplicator {
    pub fn new(settings: DedupSettings, clock: SharedClock) -> Self {
        Self {
            seen: ExpiringMap::new(settings.max_entries),
            settings,
            clock,
        }
    }

    /// Decide whether this copy is a new event. Accepted copies update the state.
    #[instrument(level = "trace", skip(self), fields(address = %key.address, name = key.name))]
    pub fn admit(&mut self, key: DedupKey, hops_left: u8) -> bool {
        let now = self.clock.now();
        let ttl = self.settings.ttl;
        self.seen.retain(|seen| now.duration_since(seen.at) < ttl);

        let accept = match self.seen.get(&key) {
            None => true,
            Some(prior) => {
                let elapsed = now.duration_since(prior.at);
                hops_left > prior.hops_left
                    || (hops_left == prior.hops_left && elapsed >= self.settings.short_threshold)
                    || elapsed >= self.settings.long_threshold
            }
        };

        if accept {
            self.seen.insert(key, Seen { at: now, hops_left });
        } else {
            debug!(hops_left, "Dropping repeated broadcast");
        }
        accept
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.len() == 0
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Second-layer filter: cleanups that follow an all-link broadcast.
#[derive(Debug)]
pub struct CleanupFilter {
    last: ExpiringMap<(Address, Option<u8>), Fired>,
    window: Duration,
    clock: SharedClock,
}

impl CleanupFilter {
    pub fn new(window: Duration, max_entries: usize, clock: SharedClock) -> Self {
        Self {
            last: ExpiringMap::new(max_entries),
            window,
            clock,
        }
    }

    /// Remember a broadcast that fired.
    pub fn broadcast_fired(&mut self, key: DedupKey) {
        self.record(key, true);
    }

    /// Should a cleanup for `key` fire? `false` when the last event fired for its
    /// group was a broadcast of the same kind inside the window. A cleanup that fires
    /// becomes the group's last event.
    pub fn cleanup_fires(&mut self, key: &DedupKey) -> bool {
        let now = self.clock.now();
        let window = self.window;
        self.last.retain(|fired| now.duration_since(fired.at) < window);
        let suppressed = self
            .last
            .get(&(key.address, key.group))
            .is_some_and(|fired| fired.broadcast && fired.name == key.name);
        if suppressed {
            debug!(address = %key.address, name = key.name, "Cleanup follows broadcast, suppressed");
        } else {
            self.record(key.clone(), false);
        }
        !suppressed
    }

    fn record(&mut self, key: DedupKey, broadcast: bool) {
        let fired = Fired {
            name: key.name,
            at: self.clock.now(),
            broadcast,
        };
        self.last.insert((key.address, key.group), fired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::ManualClock;
    use std::sync::Arc;

    fn key(name: &'static str) -> DedupKey {
        DedupKey {
            address: Address::new([0x11, 0x22, 0x33]),
            name,
            group: Some(1),
        }
    }

    fn dedup() -> (Arc<ManualClock>, BroadcastDeduplicator) {
        let clock = Arc::new(ManualClock::new());
        let dedup = BroadcastDeduplicator::new(DedupSettings::default(), clock.clone());
        (clock, dedup)
    }

    #[test]
    fn test_repeat_with_fewer_hops_is_dropped() {
        let (clock, mut dedup) = dedup();
        assert!(dedup.admit(key("on"), 3));
        clock.advance(Duration::from_millis(400));
        assert!(!dedup.admit(key("on"), 2));
    }

    #[test]
    fn test_after_long_threshold_is_new_event() {
        let (clock, mut dedup) = dedup();
        assert!(dedup.admit(key("on"), 3));
        clock.advance(Duration::from_millis(2100));
        assert!(dedup.admit(key("on"), 2));
    }

    #[test]
    fn test_same_hops_after_short_threshold() {
        let (clock, mut dedup) = dedup();
        assert!(dedup.admit(key("on"), 2));
        clock.advance(Duration::from_millis(300));
        assert!(!dedup.admit(key("on"), 2));
        clock.advance(Duration::from_millis(400));
        assert!(dedup.admit(key("on"), 2));
    }

    #[test]
    fn test_more_hops_is_new_event() {
        let (_clock, mut dedup) = dedup();
        assert!(dedup.admit(key("on"), 1));
        assert!(dedup.admit(key("on"), 3));
    }

    #[test]
    fn test_keys_are_independent() {
        let (_clock, mut dedup) = dedup();
        assert!(dedup.admit(key("on"), 3));
        assert!(dedup.admit(key("off"), 3));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_ttl_and_capacity() {
        let clock = Arc::new(ManualClock::new());
        let settings = DedupSettings {
            max_entries: 2,
            ..DedupSettings::default()
        };
        let mut dedup = BroadcastDeduplicator::new(settings, clock.clone());
        dedup.admit(key("on"), 3);
        dedup.admit(key("off"), 3);
        dedup.admit(key("on_fast"), 3);
        assert_eq!(dedup.len(), 2);

        clock.advance(DEFAULT_TTL);
        dedup.admit(key("beep"), 3);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_cleanup_after_broadcast_suppressed() {
        let clock = Arc::new(ManualClock::new());
        let mut filter = CleanupFilter::new(CLEANUP_WINDOW, 16, clock.clone());
        filter.broadcast_fired(key("on"));
        assert!(!filter.cleanup_fires(&key("on")));
        assert!(filter.cleanup_fires(&key("off")));
        clock.advance(CLEANUP_WINDOW);
        assert!(filter.cleanup_fires(&key("on")));
    }

    #[test]
    fn test_cleanup_after_a_different_press_fires() {
        let clock = Arc::new(ManualClock::new());
        let mut filter = CleanupFilter::new(CLEANUP_WINDOW, 16, clock.clone());
        filter.broadcast_fired(key("on"));
        clock.advance(Duration::from_secs(3));
        filter.broadcast_fired(key("off"));
        clock.advance(Duration::from_secs(3));
        // the second on press lost its broadcast
        assert!(filter.cleanup_fires(&key("on")));
        // a fired cleanup does not hide the next one, repeats are the first layer's job
        assert!(filter.cleanup_fires(&key("on")));

        let other_group = DedupKey {
            group: Some(2),
            ..key("off")
        };
        filter.broadcast_fired(key("off"));
        assert!(filter.cleanup_fires(&other_group));
        assert!(!filter.cleanup_fires(&key("off")));
    }
}
