//! Client sessions and their background batches.
//!
//! Each client id maps to at most one notification channel and at most one
//! tracked task. Both maps sit behind one mutex that is never held across an
//! await point.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::{Notification, NotificationChannel, CLOSE_POLICY_VIOLATION};

/// Handle to one in-flight batch.
pub struct TrackedTask {
    id: String,
    token: CancellationToken,
    join: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

impl TrackedTask {
    /// Spawn `fut` on the runtime and track it. `token` is what `cancel` trips;
    /// the future is expected to watch it.
    pub fn spawn<F>(token: CancellationToken, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done) = watch::channel(false);
        let join = tokio::spawn(async move {
            fut.await;
            let _ = done_tx.send(true);
        });
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token,
            join,
            done,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request cancellation without waiting.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves once the task has run to completion (or panicked).
    fn finished(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut done = self.done.clone();
        async move {
            // A dropped sender means the task unwound; that counts as finished too.
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No task registered for the client.
    NothingToCancel,
    /// The registered task had already finished.
    AlreadyFinished,
    /// The task stopped within the wait window.
    Cancelled,
    /// The task is still winding down; it will finish on its own.
    Pending,
}

#[derive(Default)]
struct Sessions {
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    tasks: HashMap<String, TrackedTask>,
}

pub struct ConnectionRegistry {
    sessions: Mutex<Sessions>,
    cancel_wait: Duration,
}

fn same_channel(a: &Arc<dyn NotificationChannel>, b: &Arc<dyn NotificationChannel>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl ConnectionRegistry {
    pub fn new(cancel_wait: Duration) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            cancel_wait,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Channels --- //

    /// Activate and register a channel, closing any previous one for the client.
    pub async fn connect(&self, channel: Arc<dyn NotificationChannel>, client_id: &str) {
        if let Err(e) = channel.accept().await {
            warn!(client_id, error = %e, "failed to accept channel");
        }

        let previous = self
            .lock()
            .channels
            .insert(client_id.to_string(), channel);

        if let Some(old) = previous {
            warn!(client_id, "replacing existing connection, closing the old one");
            if let Err(e) = old.close(CLOSE_POLICY_VIOLATION).await {
                warn!(client_id, error = %e, "error while closing replaced connection");
            }
        }
        info!(client_id, "client connected");
    }

    /// Deregister a channel, unless a newer connection has already replaced it.
    pub fn disconnect(&self, channel: &Arc<dyn NotificationChannel>, client_id: &str) {
        let mut sessions = self.lock();
        match sessions.channels.get(client_id) {
            Some(current) if same_channel(current, channel) => {
                sessions.channels.remove(client_id);
                info!(client_id, "client disconnected");
            }
            _ => warn!(client_id, "disconnect for unknown or stale connection ignored"),
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lock().channels.contains_key(client_id)
    }

    /// Best-effort delivery to one client. Never fails.
    pub async fn send(&self, message: Notification, client_id: &str) {
        let channel = self.lock().channels.get(client_id).cloned();
        let Some(channel) = channel else {
            return;
        };
        match channel.send(&message).await {
            Ok(()) => debug!(client_id, kind = message.kind(), "message sent"),
            Err(e) => error!(client_id, kind = message.kind(), error = %e, "failed to send message"),
        }
    }

    // --- Tasks --- //

    /// Track a batch for a client. An unfinished earlier batch is cancelled
    /// (without waiting) and replaced.
    pub fn register_task(&self, client_id: &str, task: TrackedTask) {
        let task_id = task.id.clone();
        let previous = self.lock().tasks.insert(client_id.to_string(), task);
        if let Some(old) = previous {
            if !old.is_finished() {
                warn!(client_id, old_task = %old.id, "client already has an active task, cancelling it");
                old.cancel();
            }
        }
        info!(client_id, task_id = %task_id, "task registered");
    }

    pub fn is_active(&self, client_id: &str) -> bool {
        self.lock()
            .tasks
            .get(client_id)
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancel the client's batch and wait briefly for it to wind down.
    ///
    /// The registry entry stays; the batch removes itself when it exits.
    pub async fn cancel(&self, client_id: &str) -> CancelOutcome {
        let finished = {
            let sessions = self.lock();
            let Some(task) = sessions.tasks.get(client_id) else {
                warn!(client_id, "nothing to cancel");
                return CancelOutcome::NothingToCancel;
            };
            if task.is_finished() {
                info!(client_id, "task already finished, nothing to cancel");
                return CancelOutcome::AlreadyFinished;
            }
            info!(client_id, task_id = %task.id, "cancelling task");
            task.cancel();
            task.finished()
        };

        match tokio::time::timeout(self.cancel_wait, finished).await {
            Ok(()) => {
                info!(client_id, "task cancelled");
                CancelOutcome::Cancelled
            }
            Err(_) => {
                warn!(
                    client_id,
                    wait_ms = self.cancel_wait.as_millis() as u64,
                    "task did not stop in time, it will finish cancelling in the background"
                );
                CancelOutcome::Pending
            }
        }
    }

    /// Drop the client's task entry, whatever it is.
    pub fn remove_task(&self, client_id: &str) {
        if self.lock().tasks.remove(client_id).is_some() {
            info!(client_id, "task removed");
        }
    }

    /// Drop the client's task entry only if it is still `task_id`.
    ///
    /// A batch that was replaced must not deregister its successor.
    pub fn finish_task(&self, client_id: &str, task_id: &str) {
        let mut sessions = self.lock();
        if sessions
            .tasks
            .get(client_id)
            .is_some_and(|task| task.id == task_id)
        {
            sessions.tasks.remove(client_id);
            info!(client_id, task_id, "task removed");
        } else {
            debug!(client_id, task_id, "task already replaced or removed");
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(crate::config::RunnerConfig::default().cancel_wait)
    }
}
