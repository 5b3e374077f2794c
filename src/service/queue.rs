//! Two-tier outbound write queue.
//!
//! Interactive frames (user commands) always leave before bulk frames (link-database
//! sync). Within a tier the order is FIFO, except that retransmits go to the front.

use crate::error::{constants, ProtocolError, Result};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Queue tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[default]
    Interactive,
    Bulk,
}

#[derive(Debug, Default)]
struct Tiers {
    interactive: VecDeque<Bytes>,
    bulk: VecDeque<Bytes>,
}

impl Tiers {
    fn tier(&mut self, priority: Priority) -> &mut VecDeque<Bytes> {
        match priority {
            Priority::Interactive => &mut self.interactive,
            Priority::Bulk => &mut self.bulk,
        }
    }
}

/// Pending outbound frames.
#[derive(Debug, Default)]
pub struct WriteQueue {
    tiers: Mutex<Tiers>,
    ready: Notify,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tiers>> {
        self.tiers
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_QUEUE_LOCK.to_string()))
    }

    pub fn push(&self, frame: Bytes, priority: Priority) -> Result<()> {
        self.lock()?.tier(priority).push_back(frame);
        trace!(?priority, "Frame queued");
        self.ready.notify_one();
        Ok(())
    }

    /// Queue ahead of everything else in the tier.
    pub fn push_front(&self, frame: Bytes, priority: Priority) -> Result<()> {
        self.lock()?.tier(priority).push_front(frame);
        self.ready.notify_one();
        Ok(())
    }

    pub fn try_pop(&self) -> Option<(Bytes, Priority)> {
        let mut tiers = self.lock().ok()?;
        if let Some(frame) = tiers.interactive.pop_front() {
            return Some((frame, Priority::Interactive));
        }
        tiers.bulk.pop_front().map(|frame| (frame, Priority::Bulk))
    }

    /// Wait for the next frame, highest tier first.
    pub async fn pop(&self) -> (Bytes, Priority) {
        loop {
            let notified = self.ready.notified();
            if let Some(frame) = self.try_pop() {
                return frame;
            }
            notified.await;
        }
    }

    /// Drop every queued frame.
    pub fn clear(&self) {
        if let Ok(mut tiers) = self.lock() {
            let dropped = tiers.interactive.len() + tiers.bulk.len();
            tiers.interactive.clear();
            tiers.bulk.clear();
            if dropped > 0 {
                debug!(dropped, "Discarded queued writes");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tiers
            .lock()
            .map(|tiers| tiers.interactive.len() + tiers.bulk.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
