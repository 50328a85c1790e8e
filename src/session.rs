//! Per-connection authorization state
//!
//! A connection that authenticated once (via CONNECT or a plain request)
//! is not challenged again until it closes. The runtime must call
//! [`SessionTable::remove`] on disconnect or the table grows without bound.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Opaque client connection identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out unique connection ids for the lifetime of the process
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Set of currently authorized connections
#[derive(Debug, Default)]
pub struct SessionTable {
    authorized: RwLock<HashSet<ConnectionId>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_authorized(&self, id: ConnectionId) -> bool {
        self.authorized.read().await.contains(&id)
    }

    pub async fn authorize(&self, id: ConnectionId) {
        self.authorized.write().await.insert(id);
    }

    /// Forget a connection. Returns whether it was authorized.
    pub async fn remove(&self, id: ConnectionId) -> bool {
        self.authorized.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.authorized.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.authorized.read().await.is_empty()
    }
}
