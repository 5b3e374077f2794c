//! Observability and Metrics
//!
//! Per-connection counters for modem traffic, retries and filtering.
//!
//! Uses atomic counters so the read loop, write loop and coordinators can record
//! without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Metrics collector for one modem connection
#[derive(Debug)]
pub struct Metrics {
    /// Frames decoded from the modem
    pub frames_received: AtomicU64,
    /// Frames written to the modem
    pub frames_sent: AtomicU64,
    /// Bytes read from the transport
    pub bytes_received: AtomicU64,
    /// Bytes written to the transport
    pub bytes_sent: AtomicU64,
    /// Echoes that came back with NAK
    pub naks: AtomicU64,
    /// Frames the dispatcher re-queued after a NAK
    pub retransmits: AtomicU64,
    /// Repeated broadcasts and cleanups filtered out
    pub dedup_drops: AtomicU64,
    /// Carrier frames that matched no command
    pub correlation_misses: AtomicU64,
    /// Transport connects, first one included
    pub connects: AtomicU64,
    /// Transport losses followed by a reconnect attempt
    pub reconnects: AtomicU64,
    /// Wire or reply deadlines that expired
    pub timeouts: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            naks: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            dedup_drops: AtomicU64::new(0),
            correlation_misses: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn nak(&self) {
        self.naks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retransmit(&self) {
        self.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dedup_drop(&self) {
        self.dedup_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn correlation_miss(&self) {
        self.correlation_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connected(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            naks: self.naks.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            dedup_drops: self.dedup_drops.load(Ordering::Relaxed),
            correlation_misses: self.correlation_misses.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            frames_received = snapshot.frames_received,
            frames_sent = snapshot.frames_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            naks = snapshot.naks,
            retransmits = snapshot.retransmits,
            dedup_drops = snapshot.dedup_drops,
            correlation_misses = snapshot.correlation_misses,
            connects = snapshot.connects,
            reconnects = snapshot.reconnects,
            timeouts = snapshot.timeouts,
            uptime_seconds = snapshot.uptime_seconds,
            "Modem connection metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub naks: u64,
    pub retransmits: u64,
    pub dedup_drops: u64,
    pub correlation_misses: u64,
    pub connects: u64,
    pub reconnects: u64,
    pub timeouts: u64,
    pub uptime_seconds: u64,
}
