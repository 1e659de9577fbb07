//! Latest-wins presence coalescing for presence-rpc.
//!
//! Callers may set presence as often as they like; the peer rate-limits
//! `SET_ACTIVITY`. The coalescer sits between the two: it keeps only the
//! newest requested value and hands it to the connection worker no more
//! often than once per `min_interval`.
//!
//! ```text
//! request(A) request(B) request(C)          take_due() → C
//!     │          │          │                   │
//!     ▼          ▼          ▼                   ▼
//! [pending: A] [pending: B] [pending: C] ──▶ [last_sent: C]
//! ```
//!
//! # Integration
//!
//! The worker asks for the due value on every loop iteration and otherwise
//! sleeps until [`PresenceCoalescer::next_due`]:
//!
//! ```ignore
//! loop {
//!     if let Some(p) = coalescer.take_due(Instant::now()) { send(p).await?; }
//!     let due = coalescer.next_due(Instant::now());
//!     tokio::select! {
//!         frame = reader.next_frame(&mut conn) => { /* dispatch */ }
//!         _ = sleep_until_opt(due) => {}
//!     }
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the presence coalescer.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Minimum time between two presence sends on one connection.
    ///
    /// Default: 1 second. Zero disables pacing (duplicates are still
    /// suppressed).
    pub min_interval: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
        }
    }
}

impl PacerConfig {
    /// Longest interval accepted; anything above is clamped.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

    pub fn with_interval(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.min_interval > Self::MAX_INTERVAL {
            warn!(
                interval_ms = self.min_interval.as_millis() as u64,
                max_ms = Self::MAX_INTERVAL.as_millis() as u64,
                "presence interval exceeds maximum, clamping"
            );
            self.min_interval = Self::MAX_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Coalescer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Slot<T> {
    /// Newest requested value not yet handed out.
    pending: Option<T>,
    /// Last value handed out on the current connection.
    last_sent: Option<T>,
    last_sent_at: Option<Instant>,
}

/// Collapses bursts of updates into the latest value, paced by a minimum
/// interval.
///
/// Shared between caller tasks ([`request`](Self::request)) and the worker
/// ([`take_due`](Self::take_due)). The lock is held only for slot swaps.
#[derive(Debug)]
pub struct PresenceCoalescer<T> {
    slot: Mutex<Slot<T>>,
    min_interval: Duration,
}

impl<T: Clone + PartialEq> PresenceCoalescer<T> {
    pub fn new(config: PacerConfig) -> Self {
        let config = config.validated();
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                last_sent: None,
                last_sent_at: None,
            }),
            min_interval: config.min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Replaces the pending value. Older unsent values are discarded.
    pub fn request(&self, value: T) {
        let replaced = self.lock().pending.replace(value).is_some();
        trace!(replaced, "presence requested");
    }

    /// Returns the pending value if it may be sent at `now`.
    ///
    /// A pending value equal to the last one sent is dropped without being
    /// returned. A returned value becomes the new "last sent".
    pub fn take_due(&self, now: Instant) -> Option<T> {
        let mut slot = self.lock();
        let pending = slot.pending.as_ref()?;

        if slot.last_sent.as_ref() == Some(pending) {
            slot.pending = None;
            debug!("presence unchanged, skipping send");
            return None;
        }

        let due = match slot.last_sent_at {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.min_interval,
        };
        if !due {
            return None;
        }

        let value = slot.pending.take()?;
        slot.last_sent = Some(value.clone());
        slot.last_sent_at = Some(now);
        Some(value)
    }

    /// When the pending value becomes due, or `None` if nothing is pending.
    pub fn next_due(&self, now: Instant) -> Option<Instant> {
        let slot = self.lock();
        slot.pending.as_ref()?;
        Some(match slot.last_sent_at {
            None => now,
            Some(at) => (at + self.min_interval).max(now),
        })
    }

    /// Whether a value is waiting to be sent.
    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Prepares for a new connection: the last sent value is queued again
    /// (unless something newer is already pending) and pacing restarts.
    pub fn connection_lost(&self) {
        let mut slot = self.lock();
        let last = slot.last_sent.take();
        if slot.pending.is_none() {
            slot.pending = last;
        }
        slot.last_sent_at = None;
    }

    /// The newest value the caller asked for, sent or not.
    pub fn latest(&self) -> Option<T> {
        let slot = self.lock();
        slot.pending.clone().or_else(|| slot.last_sent.clone())
    }

    /// Forgets everything.
    pub fn clear(&self) {
        let mut slot = self.lock();
        slot.pending = None;
        slot.last_sent = None;
        slot.last_sent_at = None;
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
