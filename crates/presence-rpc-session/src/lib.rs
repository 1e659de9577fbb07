//! Connection-independent bookkeeping for presence-rpc.
//!
//! This crate holds the state that outlives any single connection:
//!
//! 1. **Backoff**: how long to wait before the next reconnect attempt
//!    ([`BackoffDelay`])
//! 2. **Command queue**: ordered outbound commands and the nonce table
//!    that matches replies to callers ([`CommandQueue`], [`CommandReceipt`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Client worker (above)  ← pops commands, resolves replies, sleeps on backoff
//!     ↕
//! Session Layer (this crate)  ← survives reconnects
//!     ↕
//! Protocol Layer (below)  ← provides Command, ArgumentPayload, ErrorMessage
//! ```

mod backoff;
mod error;
mod queue;

pub use backoff::{BackoffDelay, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY};
pub use error::CommandError;
pub use queue::{CommandQueue, CommandReceipt, CommandResult, OutboundCommand, QueueConfig};
