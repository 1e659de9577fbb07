/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No endpoint in the probed range accepted a connection.
    #[error("no IPC endpoint accepted a connection")]
    NotFound,

    /// Connecting to one specific endpoint failed.
    #[error("connect to pipe {pipe} failed: {source}")]
    ConnectFailed {
        pipe: u8,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the stream (end of stream).
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The connection was closed locally, possibly from another task,
    /// while an operation was in progress.
    #[error("connection aborted")]
    Aborted,
}
