//! Local IPC transport for presence-rpc.
//!
//! The desktop application listens on a small, fixed set of numbered
//! endpoints (`discord-ipc-0` through `discord-ipc-9`). This crate hides
//! the OS specifics behind two pieces:
//!
//! - [`Connector`]: opens a stream to endpoint `n`. [`PipeConnector`] is
//!   the real implementation (Unix domain socket or Windows named pipe);
//!   tests plug in their own connector backed by `tokio::io::duplex`.
//! - [`PipeConnection`]: the connected byte stream. Reads can be aborted
//!   from another task through a [`ConnectionCloser`].
//!
//! [`discover`] walks the endpoint range and returns the first connection
//! that succeeds.

mod connection;
mod error;
mod pipe;

pub use connection::{ConnectionCloser, IpcStream, PipeConnection};
pub use error::TransportError;
pub use pipe::{PIPE_COUNT, PipeConnector, endpoint_name};

use std::fmt;
use std::future::Future;

/// Opaque identifier for a connection attempt, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which endpoints discovery is allowed to try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeTarget {
    /// Scan endpoints `0..PIPE_COUNT` in order.
    #[default]
    Any,
    /// Only try this endpoint.
    Index(u8),
}

impl PipeTarget {
    /// The endpoint indices to probe, in order.
    pub fn candidates(self) -> Vec<u8> {
        match self {
            PipeTarget::Any => (0..PIPE_COUNT).collect(),
            PipeTarget::Index(pipe) => vec![pipe],
        }
    }
}

/// Opens streams to numbered local endpoints.
pub trait Connector: Send + Sync + 'static {
    /// Connects to endpoint `pipe`.
    fn connect(
        &self,
        pipe: u8,
    ) -> impl Future<Output = Result<PipeConnection, TransportError>> + Send;
}

/// Probes the endpoints allowed by `target` and returns the first one that
/// accepts a connection.
///
/// # Errors
/// Returns [`TransportError::NotFound`] when every candidate refused.
pub async fn discover<C: Connector>(
    connector: &C,
    target: PipeTarget,
) -> Result<PipeConnection, TransportError> {
    for pipe in target.candidates() {
        match connector.connect(pipe).await {
            Ok(conn) => {
                tracing::debug!(pipe, conn_id = %conn.id(), "endpoint accepted connection");
                return Ok(conn);
            }
            Err(e) => {
                tracing::trace!(pipe, error = %e, "endpoint unavailable");
            }
        }
    }
    Err(TransportError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
        assert_eq!(id.into_inner(), 7);
    }

    #[test]
    fn test_pipe_target_any_scans_all_endpoints_in_order() {
        let candidates = PipeTarget::Any.candidates();
        assert_eq!(candidates, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_pipe_target_index_tries_single_endpoint() {
        assert_eq!(PipeTarget::Index(4).candidates(), vec![4]);
    }

    #[test]
    fn test_pipe_target_default_is_any() {
        assert_eq!(PipeTarget::default(), PipeTarget::Any);
    }
}
