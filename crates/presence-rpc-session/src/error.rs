//! Error types for the session layer.

/// Why a queued command did not complete successfully.
///
/// `Clone` so one failure can be handed to every waiting caller when the
/// whole queue is failed at once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The connection dropped before a reply arrived. The command is not
    /// retried on the next connection.
    #[error("connection lost before a reply arrived")]
    ConnectionLost,

    /// No reply arrived within the command timeout.
    #[error("command timed out")]
    Timeout,

    /// The peer answered with an `ERROR` event.
    #[error("command rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    /// The client was closed.
    #[error("client disposed")]
    Disposed,

    /// The outbound queue was full and this command was the oldest unsent.
    #[error("command dropped: outbound queue full")]
    Overflow,
}
