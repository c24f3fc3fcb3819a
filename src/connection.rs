//! Connection identifiers and the connection registry.
//!
//! A [`ConnectionHandle`] owns the write half of a socket behind an async
//! mutex, giving each connection per-connection send serialization
//! without forcing every writer through a single task. The registry
//! itself is a `std::sync::RwLock`-guarded map: inserts/removes
//! serialize, lookups don't block each other, and no `.await` is ever
//! held across the guard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::frame::{encode_frame, FrameHeader};

/// Stable opaque id assigned to a connection at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Generates unique [`ConnectionId`]s for accepted sockets.
#[derive(Debug, Default)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A send-capable handle to a live connection's socket.
///
/// Cheaply cloneable; all clones share the same write half and mutex, so
/// writes from different handler-stage tasks serialize per connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    write_half: Arc<AsyncMutex<OwnedWriteHalf>>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, write_half: OwnedWriteHalf) -> Self {
        Self {
            id,
            write_half: Arc::new(AsyncMutex::new(write_half)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Write a framed message to the wire. Serialized against any other
    /// concurrent write to the same connection.
    pub async fn write_frame(&self, header: &FrameHeader, body: &[u8]) -> Result<()> {
        let bytes = encode_frame(header, body);
        let mut half = self.write_half.lock().await;
        half.write_all(&bytes).await?;
        half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut half = self.write_half.lock().await;
        let _ = half.shutdown().await;
    }
}

/// Concurrency-safe mapping from [`ConnectionId`] to its transport handle.
///
/// Invariant: every live connection id appears here iff its TCP
/// session is open.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: ConnectionHandle) {
        self.inner.write().unwrap().insert(handle.id(), handle);
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.inner.read().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.inner.write().unwrap().remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.read().unwrap().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All currently registered connection ids, for shutdown fan-out.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.inner.read().unwrap().keys().copied().collect()
    }

    pub async fn write_to(
        &self,
        id: ConnectionId,
        header: &FrameHeader,
        body: &[u8],
    ) -> Result<()> {
        match self.get(id) {
            Some(handle) => handle.write_frame(header, body).await,
            None => Err(Error::UnknownConnection(id.0)),
        }
    }
}
