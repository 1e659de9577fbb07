//! Client configuration.
//!
//! Plain data with sensible defaults. [`ClientConfig::validated`] clamps
//! anything out of range before the client uses it, so a bad value degrades
//! to a warning instead of a stuck worker.

use std::time::Duration;

use presence_rpc_protocol::DEFAULT_MAX_PAYLOAD;
use presence_rpc_session::{DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};
use presence_rpc_transport::PipeTarget;
use tracing::warn;

/// How messages reach subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Callbacks run on the worker task as soon as a message is decoded.
    #[default]
    Immediate,
    /// Messages are queued; the caller drains them (and runs callbacks)
    /// with `RpcClient::invoke`.
    Queued,
}

/// Everything the client can be tuned with.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The application ID sent in the handshake.
    pub application_id: String,

    /// Which pipe(s) discovery tries.
    pub pipe: PipeTarget,

    /// First reconnect delay. Default: 500 ms.
    pub backoff_min: Duration,

    /// Longest reconnect delay. Default: 60 s.
    pub backoff_max: Duration,

    /// Minimum time between presence sends. Default: 1 s.
    pub presence_interval: Duration,

    /// How long a command may wait for its reply. Default: 30 s.
    pub command_timeout: Duration,

    /// How long to wait for `READY` after the handshake. Default: 10 s.
    pub handshake_timeout: Duration,

    /// How often timed-out commands are swept. Default: 1 s.
    pub sweep_interval: Duration,

    pub delivery: DeliveryMode,

    /// Outbound command queue bound. Default: 128.
    pub max_queue_size: usize,

    /// Bound of the queued-delivery message queue. Default: 128.
    pub max_event_queue: usize,

    /// Largest frame payload accepted or sent. Default: 1 MiB.
    pub max_payload: u32,

    /// Whether a URI scheme for this application has been registered.
    /// Join and spectate subscriptions are refused without one.
    pub uri_scheme_registered: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            pipe: PipeTarget::Any,
            backoff_min: DEFAULT_MIN_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
            presence_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            delivery: DeliveryMode::Immediate,
            max_queue_size: 128,
            max_event_queue: 128,
            max_payload: DEFAULT_MAX_PAYLOAD,
            uri_scheme_registered: false,
        }
    }
}

impl ClientConfig {
    /// Smallest sweep interval accepted.
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

    /// Largest payload bound accepted.
    pub const MAX_PAYLOAD_LIMIT: u32 = 16 * 1024 * 1024;

    /// A default config for `application_id`.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            ..Self::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Rules:
    /// - `backoff_min` at least 1 ms; `backoff_max` at least `backoff_min`.
    /// - `sweep_interval` at least [`Self::MIN_SWEEP_INTERVAL`].
    /// - `handshake_timeout` and `command_timeout` non-zero.
    /// - Queue bounds at least 1.
    /// - `max_payload` within `1..=`[`Self::MAX_PAYLOAD_LIMIT`].
    pub fn validated(mut self) -> Self {
        if self.application_id.is_empty() {
            warn!("application_id is empty, the peer will reject the handshake");
        }
        if self.backoff_min.is_zero() {
            warn!("backoff_min is zero, using 1ms");
            self.backoff_min = Duration::from_millis(1);
        }
        if self.backoff_max < self.backoff_min {
            warn!(
                min_ms = self.backoff_min.as_millis() as u64,
                max_ms = self.backoff_max.as_millis() as u64,
                "backoff_max below backoff_min, raising"
            );
            self.backoff_max = self.backoff_min;
        }
        if self.sweep_interval < Self::MIN_SWEEP_INTERVAL {
            warn!("sweep_interval too small, clamping");
            self.sweep_interval = Self::MIN_SWEEP_INTERVAL;
        }
        if self.handshake_timeout.is_zero() {
            warn!("handshake_timeout is zero, using default");
            self.handshake_timeout = Self::default().handshake_timeout;
        }
        if self.command_timeout.is_zero() {
            warn!("command_timeout is zero, using default");
            self.command_timeout = Self::default().command_timeout;
        }
        self.max_queue_size = self.max_queue_size.max(1);
        self.max_event_queue = self.max_event_queue.max(1);
        if self.max_payload == 0 || self.max_payload > Self::MAX_PAYLOAD_LIMIT {
            warn!(max_payload = self.max_payload, "max_payload out of range, clamping");
            self.max_payload = self.max_payload.clamp(1, Self::MAX_PAYLOAD_LIMIT);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = ClientConfig::new("42");
        assert_eq!(cfg.application_id, "42");
        assert_eq!(cfg.backoff_min, Duration::from_millis(500));
        assert_eq!(cfg.backoff_max, Duration::from_secs(60));
        assert_eq!(cfg.presence_interval, Duration::from_secs(1));
        assert_eq!(cfg.command_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_queue_size, 128);
        assert_eq!(cfg.max_payload, 1024 * 1024);
        assert_eq!(cfg.delivery, DeliveryMode::Immediate);
        assert!(!cfg.uri_scheme_registered);
    }

    #[test]
    fn test_validated_fixes_inverted_backoff() {
        let cfg = ClientConfig {
            backoff_min: Duration::from_secs(5),
            backoff_max: Duration::from_secs(1),
            ..ClientConfig::new("42")
        }
        .validated();
        assert_eq!(cfg.backoff_max, Duration::from_secs(5));
    }

    #[test]
    fn test_validated_clamps_zero_values() {
        let cfg = ClientConfig {
            backoff_min: Duration::ZERO,
            sweep_interval: Duration::ZERO,
            handshake_timeout: Duration::ZERO,
            max_queue_size: 0,
            max_event_queue: 0,
            max_payload: 0,
            ..ClientConfig::new("42")
        }
        .validated();
        assert_eq!(cfg.backoff_min, Duration::from_millis(1));
        assert_eq!(cfg.sweep_interval, ClientConfig::MIN_SWEEP_INTERVAL);
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(10));
        assert_eq!(cfg.max_queue_size, 1);
        assert_eq!(cfg.max_event_queue, 1);
        assert_eq!(cfg.max_payload, 1);
    }

    #[test]
    fn test_validated_clamps_huge_payload() {
        let cfg = ClientConfig {
            max_payload: u32::MAX,
            ..ClientConfig::new("42")
        }
        .validated();
        assert_eq!(cfg.max_payload, ClientConfig::MAX_PAYLOAD_LIMIT);
    }
}
