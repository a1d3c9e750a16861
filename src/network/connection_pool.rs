//! Bounded concurrency for client connections

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::MAX_CONNECTIONS;

/// Caps the number of client connections served at once
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionPool {
    /// Create a pool allowing `max_connections` concurrent connections.
    /// Zero is treated as one.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Take a slot for a new connection, or `None` when the pool is full.
    /// The slot is released when the guard drops.
    #[must_use]
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionGuard { _permit: permit })
    }

    /// Connections currently being served
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Configured ceiling
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(MAX_CONNECTIONS)
    }
}

/// Held for the lifetime of one connection
#[derive(Debug)]
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
}
