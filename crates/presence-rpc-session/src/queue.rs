//! The outbound command queue and nonce correlation.
//!
//! Callers enqueue commands from any task; the connection worker pops them
//! in order and writes them. Every command is registered as *pending* under
//! its nonce from the moment it is enqueued until one of:
//!
//! ```text
//!             enqueue()
//!                │
//!                ▼
//!   ┌──────── [pending] ─────────┬──────────────┬──────────────┐
//!   │ resolve(nonce)             │ fail_all()   │ expire(now)  │ overflow
//!   ▼                            ▼              ▼              ▼
//! Ok(data) / Rejected      ConnectionLost    Timeout        Overflow
//! ```
//!
//! The caller observes the outcome through the [`CommandReceipt`] returned
//! by `enqueue`.
//!
//! # Concurrency note
//!
//! All state sits behind one `std::sync::Mutex`. Every critical section is
//! a few map operations; nothing inside it awaits or does I/O. Completion
//! senders are collected under the lock and fired after it is released.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use presence_rpc_protocol::{ArgumentPayload, Command, ErrorMessage, ServerEvent};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::CommandError;

/// What a command eventually resolves to: the reply's `data`, or why not.
pub type CommandResult = Result<Value, CommandError>;

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Limits for a [`CommandQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Most commands waiting to be written. When full, the oldest unsent
    /// command is dropped and failed with [`CommandError::Overflow`].
    ///
    /// Default: 128.
    pub capacity: usize,

    /// How long a command may wait for its reply, counted from enqueue.
    ///
    /// Default: 30 seconds.
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A command ready to be written by the worker.
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    pub nonce: String,
    pub payload: ArgumentPayload,
}

/// A command registered under its nonce, awaiting its outcome.
#[derive(Debug)]
struct PendingCommand {
    command: Command,
    created_at: Instant,
    reply: oneshot::Sender<CommandResult>,
}

#[derive(Debug, Default)]
struct Inner {
    outbound: VecDeque<OutboundCommand>,
    pending: HashMap<String, PendingCommand>,
}

// ---------------------------------------------------------------------------
// CommandQueue
// ---------------------------------------------------------------------------

/// Thread-safe outbound queue with nonce-correlated replies.
#[derive(Debug)]
pub struct CommandQueue {
    inner: Mutex<Inner>,
    /// Never reset, so nonces stay unique across reconnects.
    next_nonce: AtomicU64,
    config: QueueConfig,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl CommandQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_nonce: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns a fresh nonce, unique for the lifetime of this queue.
    pub fn next_nonce(&self) -> String {
        self.next_nonce.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Queues `command` with `args`. Never blocks and never fails.
    pub fn enqueue(&self, command: Command, args: Value) -> CommandReceipt {
        self.push(ArgumentPayload::new(command, args))
    }

    /// Queues a command that names an event at the payload top level
    /// (`SUBSCRIBE` / `UNSUBSCRIBE`).
    pub fn enqueue_event(&self, command: Command, event: ServerEvent) -> CommandReceipt {
        self.push(ArgumentPayload::new(command, Value::Object(Default::default())).with_event(event))
    }

    fn push(&self, payload: ArgumentPayload) -> CommandReceipt {
        let nonce = self.next_nonce();
        let command = payload.cmd;
        let (tx, rx) = oneshot::channel();

        let dropped = {
            let mut inner = self.lock();
            let mut dropped = None;
            if inner.outbound.len() >= self.config.capacity.max(1) {
                if let Some(old) = inner.outbound.pop_front() {
                    dropped = inner.pending.remove(&old.nonce).map(|p| (old.nonce, p));
                }
            }
            inner.outbound.push_back(OutboundCommand {
                nonce: nonce.clone(),
                payload: payload.with_nonce(nonce.clone()),
            });
            inner.pending.insert(
                nonce.clone(),
                PendingCommand {
                    command,
                    created_at: Instant::now(),
                    reply: tx,
                },
            );
            dropped
        };

        if let Some((old_nonce, old)) = dropped {
            tracing::warn!(nonce = %old_nonce, cmd = %old.command, "outbound queue full, dropping oldest command");
            let _ = old.reply.send(Err(CommandError::Overflow));
        }
        tracing::trace!(%nonce, cmd = %command, "command queued");

        CommandReceipt { nonce, rx }
    }

    /// Takes the next command to write, in enqueue order.
    ///
    /// Commands that expect no reply are completed with `Ok(null)` here,
    /// since nothing will ever echo their nonce.
    pub fn pop_next(&self) -> Option<OutboundCommand> {
        let (next, done) = {
            let mut inner = self.lock();
            let next = inner.outbound.pop_front();
            let done = match &next {
                Some(c) if !c.payload.cmd.expects_reply() => inner.pending.remove(&c.nonce),
                _ => None,
            };
            (next, done)
        };
        if let Some(done) = done {
            let _ = done.reply.send(Ok(Value::Null));
        }
        next
    }

    /// Completes the pending command registered under `nonce`.
    ///
    /// Returns `false` if no such command is pending (it was never ours,
    /// or it already timed out); the caller then treats the payload as an
    /// ordinary event.
    pub fn resolve(&self, nonce: &str, outcome: Result<Value, ErrorMessage>) -> bool {
        let Some(pending) = self.lock().pending.remove(nonce) else {
            return false;
        };
        let result = outcome.map_err(|e| CommandError::Rejected {
            code: e.code,
            message: e.message,
        });
        tracing::debug!(%nonce, cmd = %pending.command, ok = result.is_ok(), "command resolved");
        let _ = pending.reply.send(result);
        true
    }

    /// Whether `nonce` belongs to a command still awaiting its outcome.
    pub fn is_pending(&self, nonce: &str) -> bool {
        self.lock().pending.contains_key(nonce)
    }

    /// Fails every registered command (sent or not) with `error`.
    ///
    /// Returns how many commands were failed.
    pub fn fail_all(&self, error: CommandError) -> usize {
        let pending: Vec<_> = {
            let mut inner = self.lock();
            inner.outbound.clear();
            inner.pending.drain().map(|(_, p)| p).collect()
        };
        let count = pending.len();
        for p in pending {
            let _ = p.reply.send(Err(error.clone()));
        }
        if count > 0 {
            tracing::debug!(count, %error, "failed all pending commands");
        }
        count
    }

    /// Fails commands older than the configured timeout.
    ///
    /// Returns the nonces that expired.
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let timeout = self.config.timeout;
        let expired: Vec<(String, PendingCommand)> = {
            let mut inner = self.lock();
            let stale: Vec<String> = inner
                .pending
                .iter()
                .filter(|(_, p)| now.saturating_duration_since(p.created_at) >= timeout)
                .map(|(nonce, _)| nonce.clone())
                .collect();
            if !stale.is_empty() {
                inner.outbound.retain(|c| !stale.contains(&c.nonce));
            }
            stale
                .into_iter()
                .filter_map(|nonce| inner.pending.remove(&nonce).map(|p| (nonce, p)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(nonce, p)| {
                tracing::warn!(%nonce, cmd = %p.command, "command timed out");
                let _ = p.reply.send(Err(CommandError::Timeout));
                nonce
            })
            .collect()
    }

    /// Commands waiting to be written.
    pub fn len(&self) -> usize {
        self.lock().outbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().outbound.is_empty()
    }

    /// Commands awaiting an outcome, written or not.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// CommandReceipt
// ---------------------------------------------------------------------------

/// The caller's handle on one queued command.
///
/// Await it (it is a `Future`) or poll it with [`try_result`](Self::try_result).
/// Dropping it does not cancel the command.
#[derive(Debug)]
pub struct CommandReceipt {
    nonce: String,
    rx: oneshot::Receiver<CommandResult>,
}

impl CommandReceipt {
    /// A receipt that is already failed, for commands refused up front.
    pub fn failed(error: CommandError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self {
            nonce: String::new(),
            rx,
        }
    }

    /// The nonce the command was sent with. Empty for [`failed`](Self::failed) receipts.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Waits for the outcome.
    pub async fn wait(self) -> CommandResult {
        self.await
    }

    /// Returns the outcome if it is already known.
    pub fn try_result(&mut self) -> Option<CommandResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(CommandError::Disposed)),
        }
    }
}

impl Future for CommandReceipt {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the queue itself is gone.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CommandError::Disposed)))
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for `CommandQueue`.
    //!
    //! Timeout tests run with tokio's clock paused so that `Instant::now()`
    //! only moves when the test advances it.

    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    fn queue_with(capacity: usize, timeout_secs: u64) -> CommandQueue {
        CommandQueue::new(QueueConfig {
            capacity,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    // =====================================================================
    // enqueue() / pop_next()
    // =====================================================================

    #[test]
    fn test_enqueue_pop_preserves_order_and_attaches_nonce() {
        let q = CommandQueue::default();
        let a = q.enqueue(Command::SetActivity, json!({"n": 1}));
        let b = q.enqueue(Command::SendActivityJoinInvite, json!({"n": 2}));

        let first = q.pop_next().unwrap();
        let second = q.pop_next().unwrap();

        assert_eq!(first.nonce, a.nonce());
        assert_eq!(first.payload.nonce.as_deref(), Some(a.nonce()));
        assert_eq!(second.nonce, b.nonce());
        assert!(q.pop_next().is_none());
        // Popped commands stay pending until resolved.
        assert_eq!(q.pending_len(), 2);
    }

    #[test]
    fn test_enqueue_event_sets_top_level_event() {
        let q = CommandQueue::default();
        let _r = q.enqueue_event(Command::Subscribe, ServerEvent::ActivityJoin);
        let cmd = q.pop_next().unwrap();
        assert_eq!(cmd.payload.evt, Some(ServerEvent::ActivityJoin));
        assert_eq!(cmd.payload.args, json!({}));
    }

    #[test]
    fn test_next_nonce_unique() {
        let q = CommandQueue::default();
        let nonces: HashSet<String> = (0..1000).map(|_| q.next_nonce()).collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[tokio::test]
    async fn test_pop_next_completes_fire_and_forget_command() {
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::Dispatch, Value::Null);

        q.pop_next().unwrap();

        assert_eq!(receipt.await, Ok(Value::Null));
        assert_eq!(q.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_full_queue_drops_oldest_with_overflow() {
        let q = queue_with(2, 30);
        let oldest = q.enqueue(Command::SetActivity, json!(1));
        let _b = q.enqueue(Command::SetActivity, json!(2));
        let _c = q.enqueue(Command::SetActivity, json!(3));

        assert_eq!(oldest.await, Err(CommandError::Overflow));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_next().unwrap().payload.args, json!(2));
    }

    // =====================================================================
    // resolve()
    // =====================================================================

    #[tokio::test]
    async fn test_resolve_matching_nonce_completes_receipt() {
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::Subscribe, json!({}));
        let nonce = receipt.nonce().to_owned();
        q.pop_next();

        assert!(q.resolve(&nonce, Ok(json!({"evt": "ACTIVITY_JOIN"}))));

        assert_eq!(receipt.await, Ok(json!({"evt": "ACTIVITY_JOIN"})));
        assert!(!q.is_pending(&nonce));
    }

    #[tokio::test]
    async fn test_resolve_error_reply_is_rejected() {
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::SetActivity, json!({}));
        let nonce = receipt.nonce().to_owned();

        q.resolve(
            &nonce,
            Err(ErrorMessage {
                code: 4000,
                message: "bad args".into(),
            }),
        );

        assert_eq!(
            receipt.await,
            Err(CommandError::Rejected {
                code: 4000,
                message: "bad args".into()
            })
        );
    }

    #[test]
    fn test_resolve_unknown_nonce_returns_false() {
        let q = CommandQueue::default();
        assert!(!q.resolve("999", Ok(Value::Null)));
    }

    // =====================================================================
    // fail_all()
    // =====================================================================

    #[tokio::test]
    async fn test_fail_all_fails_sent_and_unsent_commands() {
        let q = CommandQueue::default();
        let sent = q.enqueue(Command::Subscribe, json!({}));
        let unsent = q.enqueue(Command::Unsubscribe, json!({}));
        q.pop_next();

        assert_eq!(q.fail_all(CommandError::ConnectionLost), 2);

        assert_eq!(sent.await, Err(CommandError::ConnectionLost));
        assert_eq!(unsent.await, Err(CommandError::ConnectionLost));
        assert!(q.is_empty());
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_fail_all_nonces_keep_increasing() {
        let q = CommandQueue::default();
        let before = q.enqueue(Command::Subscribe, json!({}));
        q.fail_all(CommandError::ConnectionLost);
        let after = q.enqueue(Command::Subscribe, json!({}));

        let a: u64 = before.nonce().parse().unwrap();
        let b: u64 = after.nonce().parse().unwrap();
        assert!(b > a);
    }

    // =====================================================================
    // expire()
    // =====================================================================

    #[tokio::test(start_paused = true)]
    async fn test_expire_fails_only_old_commands() {
        let q = queue_with(128, 30);
        let old = q.enqueue(Command::Subscribe, json!({}));
        let old_nonce = old.nonce().to_owned();

        tokio::time::advance(Duration::from_secs(20)).await;
        let mut young = q.enqueue(Command::Subscribe, json!({}));

        tokio::time::advance(Duration::from_secs(10)).await;
        let expired = q.expire(Instant::now());

        assert_eq!(expired, vec![old_nonce]);
        assert_eq!(old.await, Err(CommandError::Timeout));
        assert!(young.try_result().is_none());
        // The expired command is also gone from the outbound order.
        assert_eq!(q.len(), 1);
    }

    // =====================================================================
    // CommandReceipt
    // =====================================================================

    #[tokio::test]
    async fn test_receipt_failed_is_immediately_ready() {
        let mut receipt = CommandReceipt::failed(CommandError::Disposed);
        assert_eq!(receipt.try_result(), Some(Err(CommandError::Disposed)));
    }

    #[tokio::test]
    async fn test_receipt_queue_dropped_is_disposed() {
        let q = CommandQueue::default();
        let receipt = q.enqueue(Command::Subscribe, json!({}));
        drop(q);
        assert_eq!(receipt.wait().await, Err(CommandError::Disposed));
    }
}
