//! # presence-rpc
//!
//! Rich-presence client for the desktop chat application's local IPC.
//!
//! The client publishes "what the user is doing" to the desktop
//! application over a local pipe and receives events back (ready, errors,
//! join and spectate requests). Connection handling is fully automatic:
//! discovery, handshake, reconnect with backoff, and pacing of presence
//! updates all happen on one background task.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use presence_rpc::prelude::*;
//!
//! # async fn demo() -> Result<(), ClientError> {
//! let client = RpcClient::builder("424087019149328395").build();
//! client.on(MessageKind::Ready, |m| println!("{m:?}"));
//! client.connect()?;
//! client.set_presence(&RichPresence::new().with_state("Exploring"))?;
//! // ...
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! ```text
//! presence-rpc            RpcClient, worker, dispatcher   (this crate)
//!   ├── presence-rpc-pacer      latest-wins presence coalescing
//!   ├── presence-rpc-session    backoff, command queue
//!   ├── presence-rpc-protocol   frames, payloads, handshake, messages
//!   └── presence-rpc-transport  pipe discovery and streams
//! ```

mod client;
mod config;
mod dispatcher;
mod error;
mod state;
mod worker;

pub use client::{RpcClient, RpcClientBuilder};
pub use config::{ClientConfig, DeliveryMode};
pub use dispatcher::{Callback, SubscriberId};
pub use error::ClientError;
pub use state::ConnectionState;

pub use presence_rpc_protocol as protocol;
pub use presence_rpc_session::{CommandError, CommandReceipt, CommandResult};
pub use presence_rpc_transport::{
    Connector, PipeConnection, PipeConnector, PipeTarget, TransportError,
};

/// Everything needed for typical use, in one import.
pub mod prelude {
    pub use crate::{
        ClientConfig, ClientError, CommandError, CommandReceipt, ConnectionState, DeliveryMode,
        PipeTarget, RpcClient, RpcClientBuilder, SubscriberId,
    };
    pub use presence_rpc_protocol::{
        Assets, Button, Command, EventFlags, JoinRequestMessage, Message, MessageKind, Party,
        RichPresence, Secrets, Timestamps, User,
    };
}
