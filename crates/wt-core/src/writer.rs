//! Background write-behind for store commands.
//!
//! The engine transitions in memory and hands each [`StoreCommand`] to a
//! [`WriterHandle`]. A single tokio task applies the commands strictly in
//! submission order, retrying transient failures with exponential backoff.
//! Failures are reported on the [`PersistenceEvent`] channel; they never
//! reach the caller of the transition.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::command::{CommandSink, StoreCommand};
use crate::store::{SessionStore, SharedStore, StoreError, with_store_mut};

/// Retry policy for failed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry. Doubles on every further attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the delay between attempts.
    pub max_backoff: Duration,
    /// Total attempts per command; `None` retries until the write succeeds.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            max_attempts: Some(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn allows_retry_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Outcome reports for writes that did not succeed on the first try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceEvent {
    /// A retryable failure; the command will be attempted again.
    Retrying {
        command: StoreCommand,
        attempt: u32,
        error: String,
        retry_in: Duration,
    },
    /// The command was dropped. The in-memory state keeps the transition.
    Abandoned {
        command: StoreCommand,
        attempts: u32,
        error: String,
    },
}

impl fmt::Display for PersistenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrying {
                command,
                attempt,
                error,
                retry_in,
            } => write!(
                f,
                "{} for session {} failed (attempt {attempt}): {error}; retrying in {}ms",
                command.name(),
                command.session_id(),
                retry_in.as_millis()
            ),
            Self::Abandoned {
                command,
                attempts,
                error,
            } => write!(
                f,
                "{} for session {} abandoned after {attempts} attempt(s): {error}",
                command.name(),
                command.session_id()
            ),
        }
    }
}

#[derive(Debug)]
enum WriterMessage {
    Apply(StoreCommand),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Submits commands to the background writer.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::UnboundedSender<WriterMessage>,
}

impl WriterHandle {
    /// Waits until every command submitted before this call has been
    /// applied or abandoned.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(WriterMessage::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }
}

impl CommandSink for WriterHandle {
    fn submit(&self, command: StoreCommand) {
        let name = command.name();
        let session_id = command.session_id().clone();
        if self.tx.send(WriterMessage::Apply(command)).is_err() {
            error!(command = name, %session_id, "store writer has stopped; dropping command");
        }
    }
}

/// The running writer task.
#[derive(Debug)]
pub struct WriteBehind {
    handle: WriterHandle,
    task: JoinHandle<()>,
}

impl WriteBehind {
    /// A handle to pass to the engine as its [`CommandSink`].
    #[must_use]
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Applies everything already queued, then stops the task.
    ///
    /// Commands submitted afterwards are dropped and logged.
    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(WriterMessage::Close);
        if let Err(err) = self.task.await {
            error!(error = %err, "store writer task failed");
        }
    }
}

/// Spawns the writer on the current tokio runtime.
///
/// Returns the writer and the receiving end of its event channel.
pub fn spawn_writer<S>(
    store: SharedStore<S>,
    policy: RetryPolicy,
) -> (WriteBehind, mpsc::UnboundedReceiver<PersistenceEvent>)
where
    S: SessionStore + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_writer(store, rx, events_tx, policy));
    (
        WriteBehind {
            handle: WriterHandle { tx },
            task,
        },
        events_rx,
    )
}

async fn run_writer<S>(
    store: SharedStore<S>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    events: mpsc::UnboundedSender<PersistenceEvent>,
    policy: RetryPolicy,
) where
    S: SessionStore + Send + 'static,
{
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Apply(command) => {
                apply_with_retry(&store, command, &events, &policy).await;
            }
            WriterMessage::Flush(done) => {
                let _ = done.send(());
            }
            WriterMessage::Close => break,
        }
    }
    debug!("store writer stopped");
}

async fn apply_with_retry<S>(
    store: &SharedStore<S>,
    command: StoreCommand,
    events: &mpsc::UnboundedSender<PersistenceEvent>,
    policy: &RetryPolicy,
) where
    S: SessionStore + Send + 'static,
{
    let mut attempt = 1;
    loop {
        match apply_blocking(store, &command).await {
            Ok(()) => {
                debug!(
                    command = command.name(),
                    session_id = %command.session_id(),
                    attempt,
                    "store command applied"
                );
                return;
            }
            Err(err) if err.is_retryable() && policy.allows_retry_after(attempt) => {
                let retry_in = policy.backoff(attempt);
                warn!(
                    command = command.name(),
                    session_id = %command.session_id(),
                    attempt,
                    error = %err,
                    retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                    "store write failed; retrying"
                );
                let _ = events.send(PersistenceEvent::Retrying {
                    command: command.clone(),
                    attempt,
                    error: err.to_string(),
                    retry_in,
                });
                tokio::time::sleep(retry_in).await;
                attempt += 1;
            }
            Err(err) => {
                error!(
                    command = command.name(),
                    session_id = %command.session_id(),
                    attempts = attempt,
                    error = %err,
                    "store write abandoned"
                );
                let _ = events.send(PersistenceEvent::Abandoned {
                    command,
                    attempts: attempt,
                    error: err.to_string(),
                });
                return;
            }
        }
    }
}

async fn apply_blocking<S>(store: &SharedStore<S>, command: &StoreCommand) -> Result<(), StoreError>
where
    S: SessionStore + Send + 'static,
{
    let store = Arc::clone(store);
    let command = command.clone();
    tokio::task::spawn_blocking(move || with_store_mut(&store, |s| command.apply(s)))
        .await
        .map_err(|err| StoreError::Rejected(Box::new(err)))?
}
