//! `RpcClient` builder and public handle.
//!
//! Every public operation only touches shared state and returns at once:
//! presence goes into the coalescer slot, commands into the queue,
//! subscriptions into the subscriber list. The worker spawned by
//! [`RpcClient::connect`] does all the I/O.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use presence_rpc_pacer::{PacerConfig, PresenceCoalescer};
use presence_rpc_protocol::{
    Command, EventFlags, JoinReplyArgs, JoinRequestMessage, Message, MessageKind, RichPresence,
    User,
};
use presence_rpc_session::{CommandError, CommandQueue, CommandReceipt, QueueConfig};
use presence_rpc_transport::{Connector, PipeConnector, PipeTarget};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{Dispatcher, SubscriberId};
use crate::worker::{self, Shared};
use crate::{ClientConfig, ClientError, ConnectionState, DeliveryMode};

/// How long `close` waits for the worker before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring an [`RpcClient`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use presence_rpc::prelude::*;
///
/// # async fn demo() -> Result<(), ClientError> {
/// let client = RpcClient::builder("424087019149328395")
///     .presence_interval(Duration::from_secs(2))
///     .build();
/// client.connect()?;
/// client.set_presence(&RichPresence::new().with_details("In the menus"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RpcClientBuilder {
    config: ClientConfig,
}

impl RpcClientBuilder {
    /// Creates a builder with default settings for `application_id`.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            config: ClientConfig::new(application_id),
        }
    }

    /// Restricts discovery to one pipe, or lets it scan all of them.
    pub fn pipe(mut self, pipe: PipeTarget) -> Self {
        self.config.pipe = pipe;
        self
    }

    /// Sets the reconnect backoff range.
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.backoff_min = min;
        self.config.backoff_max = max;
        self
    }

    /// Sets the minimum time between presence sends.
    pub fn presence_interval(mut self, interval: Duration) -> Self {
        self.config.presence_interval = interval;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn delivery(mut self, mode: DeliveryMode) -> Self {
        self.config.delivery = mode;
        self
    }

    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.max_queue_size = size;
        self
    }

    /// Declares whether a URI scheme for this application is registered.
    pub fn uri_scheme_registered(mut self, registered: bool) -> Self {
        self.config.uri_scheme_registered = registered;
        self
    }

    /// Replaces the whole configuration, keeping nothing from the builder.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a client that talks to the real OS pipes.
    pub fn build(self) -> RpcClient<PipeConnector> {
        self.build_with_connector(PipeConnector::new())
    }

    /// Builds a client that opens its streams through `connector`.
    pub fn build_with_connector<C: Connector>(self, connector: C) -> RpcClient<C> {
        RpcClient::with_config(self.config, connector)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A rich-presence client.
///
/// Cheap to share behind an `Arc`; every method takes `&self`. Dropping
/// the client stops the worker, but only [`close`](Self::close) waits for
/// it and guarantees no callback fires afterwards.
pub struct RpcClient<C: Connector = PipeConnector> {
    shared: Arc<Shared>,
    /// Taken by `connect`.
    connector: Mutex<Option<C>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient<PipeConnector> {
    /// Creates a new builder.
    pub fn builder(application_id: impl Into<String>) -> RpcClientBuilder {
        RpcClientBuilder::new(application_id)
    }
}

impl<C: Connector> RpcClient<C> {
    fn with_config(config: ClientConfig, connector: C) -> Self {
        let config = config.validated();
        let queue = CommandQueue::new(QueueConfig {
            capacity: config.max_queue_size,
            timeout: config.command_timeout,
        });
        let presence = PresenceCoalescer::new(PacerConfig::with_interval(config.presence_interval));
        let dispatcher = Dispatcher::new(config.delivery, config.max_event_queue);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                config,
                queue,
                presence,
                dispatcher,
                state,
                user: Mutex::new(None),
                subscription: Mutex::new(EventFlags::NONE),
                wake: Notify::new(),
                shutdown,
                active: Mutex::new(None),
            }),
            connector: Mutex::new(Some(connector)),
            worker: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawns the background worker on the current tokio runtime.
    ///
    /// # Errors
    /// - [`ClientError::Disposed`] after `close`
    /// - [`ClientError::AlreadyConnected`] on a second call
    /// - [`ClientError::NoRuntime`] outside a tokio runtime
    pub fn connect(&self) -> Result<(), ClientError> {
        if self.is_stopped() {
            return Err(ClientError::Disposed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;
        let connector = self
            .connector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ClientError::AlreadyConnected)?;

        let handle = runtime.spawn(worker::run(Arc::clone(&self.shared), connector));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(application_id = %self.shared.config.application_id, "client connecting");
        Ok(())
    }

    /// Stops the worker and releases the pipe. Idempotent.
    ///
    /// Sends a best-effort `Close` frame if a connection is live, waits for
    /// the worker to exit, then fails every remaining command with
    /// [`CommandError::Disposed`] and drops queued messages. No callback
    /// runs after this returns.
    pub async fn close(&self) {
        let already = self.shared.shutdown.send_replace(true);
        self.shared.wake.notify_one();

        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!("worker did not stop in time, aborting");
                if let Some(closer) = self.shared.active().take() {
                    closer.close();
                }
                handle.abort();
                let _ = handle.await;
            }
        }

        self.shared.dispose_state();
        self.shared.dispatcher.clear_queued();
        if !already {
            info!("client closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_disposed(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The user reported by the last `READY`, while connected.
    pub fn current_user(&self) -> Option<User> {
        self.shared.user().clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Requests a new presence. Latest wins; identical values are not resent.
    ///
    /// # Errors
    /// - [`ClientError::InvalidPresence`] unless `presence` serializes to a
    ///   JSON object
    /// - [`ClientError::Disposed`] after `close` or a fatal error
    pub fn set_presence<P: Serialize + ?Sized>(&self, presence: &P) -> Result<(), ClientError> {
        let value = serde_json::to_value(presence)
            .map_err(|e| ClientError::InvalidPresence(e.to_string()))?;
        if !value.is_object() {
            return Err(ClientError::InvalidPresence(
                "presence must serialize to a JSON object".into(),
            ));
        }
        self.request_presence(Some(value))
    }

    /// Requests that the presence be cleared.
    pub fn clear_presence(&self) -> Result<(), ClientError> {
        self.request_presence(None)
    }

    /// Edits the latest requested presence in place and requests the result.
    ///
    /// Starts from an empty [`RichPresence`] if none was set, the last one was
    /// cleared, or it was set with a type that does not read back as one.
    pub fn update_presence(
        &self,
        edit: impl FnOnce(&mut RichPresence),
    ) -> Result<(), ClientError> {
        let mut presence = self
            .shared
            .presence
            .latest()
            .flatten()
            .and_then(|value| serde_json::from_value::<RichPresence>(value).ok())
            .unwrap_or_default();
        edit(&mut presence);
        self.set_presence(&presence)
    }

    fn request_presence(&self, activity: Option<Value>) -> Result<(), ClientError> {
        if self.is_stopped() {
            return Err(ClientError::Disposed);
        }
        self.shared.presence.request(activity);
        self.shared.wake.notify_one();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Replaces the set of subscribed server events.
    ///
    /// Only the difference to the current set is sent. The full set is sent
    /// again after every reconnect.
    ///
    /// # Errors
    /// - [`ClientError::UriSchemeNotRegistered`] for a non-empty set without
    ///   a registered URI scheme
    /// - [`ClientError::Disposed`] after `close` or a fatal error
    pub fn set_subscription(&self, flags: EventFlags) -> Result<(), ClientError> {
        if self.is_stopped() {
            return Err(ClientError::Disposed);
        }
        if !flags.is_empty() && !self.shared.config.uri_scheme_registered {
            return Err(ClientError::UriSchemeNotRegistered);
        }

        let mut current = self.shared.subscription();
        let added = flags.difference(*current);
        let removed = current.difference(flags);
        *current = flags;
        if self.shared.state().is_ready() {
            self.shared.enqueue_subscription(Command::Subscribe, added);
            self.shared.enqueue_subscription(Command::Unsubscribe, removed);
        }
        drop(current);

        debug!(?flags, "subscription updated");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// The currently requested subscription set.
    pub fn subscription(&self) -> EventFlags {
        *self.shared.subscription()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Accepts or rejects a join request.
    pub fn respond(&self, request: &JoinRequestMessage, accept: bool) -> CommandReceipt {
        let command = if accept {
            Command::SendActivityJoinInvite
        } else {
            Command::CloseActivityRequest
        };
        let args = JoinReplyArgs {
            user_id: request.user.id.clone(),
        };
        match serde_json::to_value(args) {
            Ok(args) => self.send_command(command, args),
            Err(e) => {
                warn!(error = %e, "join reply could not be encoded");
                CommandReceipt::failed(CommandError::Rejected {
                    code: -1,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Queues an arbitrary command. Sent in order once the client is ready.
    pub fn send_command(&self, command: Command, args: Value) -> CommandReceipt {
        if self.is_stopped() {
            return CommandReceipt::failed(CommandError::Disposed);
        }
        let receipt = self.shared.queue.enqueue(command, args);
        self.shared.wake.notify_one();
        if self.is_stopped() {
            // Lost the race with disposal; nothing will ever flush the queue.
            self.shared.queue.fail_all(CommandError::Disposed);
        }
        receipt
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Registers `callback` for one kind of message.
    pub fn on(
        &self,
        kind: MessageKind,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> SubscriberId {
        self.shared.dispatcher.subscribe(Some(kind), Arc::new(callback))
    }

    /// Registers `callback` for every message.
    pub fn on_any(&self, callback: impl Fn(&Message) + Send + Sync + 'static) -> SubscriberId {
        self.shared.dispatcher.subscribe(None, Arc::new(callback))
    }

    /// Removes a callback. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriberId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    /// Drains queued messages, running callbacks on the calling task.
    ///
    /// Only meaningful with [`DeliveryMode::Queued`]; returns an empty list
    /// in immediate mode.
    pub fn invoke(&self) -> Vec<Message> {
        self.shared.dispatcher.invoke()
    }

    /// Disposed, or stopped for good after a fatal error.
    fn is_stopped(&self) -> bool {
        self.shared.is_shutdown() || self.shared.state().is_terminal()
    }
}

impl<C: Connector> Drop for RpcClient<C> {
    fn drop(&mut self) {
        // Sync drop cannot join the worker; signal it and cut the pipe.
        self.shared.shutdown.send_replace(true);
        if let Some(closer) = self.shared.active().take() {
            closer.close();
        }
    }
}

impl<C: Connector> std::fmt::Debug for RpcClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("application_id", &self.shared.config.application_id)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
