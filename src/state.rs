//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into every connection task. Connections never share mutable data
//! with each other; the only cross-connection structure is the registry of
//! live connections, which is informational and guarded by a mutex.
//!
//! Registry entries are owned by a `ConnectionGuard` held by the connection
//! task. Dropping the guard (normal exit or panic unwind) unregisters.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::processor::{FragmentHistory, FragmentProcessor, RecordingProcessor, now_ms};

// =============================================================================
// CONNECTION REGISTRY
// =============================================================================

/// Bookkeeping entry for one live connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    /// Milliseconds since Unix epoch.
    pub connected_at: i64,
    /// Fragments processed on this connection so far.
    pub fragments: u64,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<Uuid, ConnectionInfo>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. It stays registered until the guard drops.
    #[must_use]
    pub fn register(&self, peer: Option<SocketAddr>) -> ConnectionGuard {
        let id = Uuid::new_v4();
        let info = ConnectionInfo { id, peer, connected_at: now_ms(), fragments: 0 };
        self.lock().insert(id, info);
        ConnectionGuard { id, registry: self.clone() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live connections, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self.lock().values().cloned().collect();
        all.sort_by_key(|c| c.connected_at);
        all
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ConnectionInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry membership for one connection task.
pub struct ConnectionGuard {
    id: Uuid,
    registry: ConnectionRegistry,
}

impl ConnectionGuard {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record_fragment(&self) {
        if let Some(info) = self.registry.lock().get_mut(&self.id) {
            info.fragments += 1;
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub processor: Arc<dyn FragmentProcessor>,
    pub connections: ConnectionRegistry,
    /// Recent fragment history. `None` when disabled by config.
    pub history: Option<FragmentHistory>,
    /// Cancelled when the listener stops; connections close after their
    /// current message.
    pub shutdown: CancellationToken,
    /// Tracks connection tasks so shutdown can wait for them.
    pub tracker: TaskTracker,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, processor: Arc<dyn FragmentProcessor>) -> Self {
        let (processor, history) = if config.fragment_history > 0 {
            let history = FragmentHistory::new(config.fragment_history);
            let recording: Arc<dyn FragmentProcessor> = Arc::new(RecordingProcessor::new(processor, history.clone()));
            (recording, Some(history))
        } else {
            (processor, None)
        };

        Self {
            config: Arc::new(config),
            processor,
            connections: ConnectionRegistry::new(),
            history,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
