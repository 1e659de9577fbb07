//! The connection state machine's states.
//!
//! ```text
//! Disconnected ──connect──▶ Discovering ──pipe found──▶ Connecting
//!      ▲                        │                          │ handshake sent
//!      │ backoff                │ nothing found            ▼
//!      ├────────────────────────┘                AwaitingHandshakeAck
//!      │                                                   │ READY
//!      │◀──────────── io error / peer close ──────── Ready ◀┘
//!      │                                             │
//!      │                              dispose        ▼
//!      └── version mismatch ──▶ Closed ◀──────── Closing
//! ```

use std::fmt;

/// Where the worker is in its connection lifecycle.
///
/// Owned by the worker; callers only ever see snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected; either never started or waiting out a backoff.
    #[default]
    Disconnected,
    /// Probing pipes.
    Discovering,
    /// A pipe accepted; the handshake is being written.
    Connecting,
    /// Handshake written, waiting for `READY`.
    AwaitingHandshakeAck,
    /// Commands and presence flow.
    Ready,
    /// Disposal in progress.
    Closing,
    /// Terminal. Reached by disposal or a protocol version mismatch.
    Closed,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        self == ConnectionState::Ready
    }

    /// Whether the worker has stopped for good.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingHandshakeAck => "awaiting-handshake-ack",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
