//! Fan-out of state snapshots to connected sessions.
//!
//! The hub keeps a registry of session sinks. Publishing serializes the
//! message once and hands it to every sink without waiting: a sink that
//! cannot take the message right away (closed, or its queue is full) is
//! removed from the registry, and delivery to the others is unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::state::StateSnapshot;

/// Identifies a registered session.
pub type SessionId = u64;

/// A sink refused a message and must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

/// Where the hub delivers messages for one session.
///
/// Delivery must not block; a sink that cannot accept the message
/// immediately reports [`SessionClosed`].
pub trait SessionSink: Send + Sync {
    /// Hands one serialized message to the session.
    fn deliver(&self, message: Arc<str>) -> Result<(), SessionClosed>;
}

impl SessionSink for mpsc::Sender<Arc<str>> {
    fn deliver(&self, message: Arc<str>) -> Result<(), SessionClosed> {
        self.try_send(message).map_err(|_| SessionClosed)
    }
}

/// Registry of live sessions.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    sessions: Arc<Mutex<HashMap<SessionId, Box<dyn SessionSink>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl BroadcastHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session and returns its id.
    pub async fn register(&self, sink: impl SessionSink + 'static) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.lock().await;
        sessions.insert(id, Box::new(sink));
        info!(session = id, total = sessions.len(), "Session registered");
        id
    }

    /// Removes a session. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            info!(session = id, total = sessions.len(), "Session removed");
        }
        removed
    }

    /// Delivers `message` to every session.
    ///
    /// Returns the number of sessions that accepted it. Sessions that
    /// refused it are removed.
    pub async fn publish(&self, message: &str) -> usize {
        let message: Arc<str> = Arc::from(message);
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|id, sink| match sink.deliver(Arc::clone(&message)) {
            Ok(()) => true,
            Err(SessionClosed) => {
                debug!(session = *id, "Dropping unresponsive session");
                false
            }
        });

        let delivered = sessions.len();
        if delivered < before {
            info!(
                dropped = before - delivered,
                total = delivered,
                "Removed sessions after failed delivery"
            );
        }
        delivered
    }

    /// Serializes a snapshot and publishes it.
    pub async fn publish_snapshot(&self, snapshot: &StateSnapshot) -> usize {
        match serde_json::to_string(snapshot) {
            Ok(json) => self.publish(&json).await,
            Err(e) => {
                warn!("Failed to serialize snapshot: {}", e);
                0
            }
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
