//! Bounded FIFO buffers with poison-pill shutdown.
//!
//! Each of the four event families gets one [`Buffer`]/[`BufferConsumer`]
//! pair. `put` is multi-producer safe (the `Buffer` handle is `Clone`);
//! `get` is meant for a single consumer, matching the one-handler-task-per-
//! buffer design. Closing a buffer and enqueuing its sentinel happen while
//! holding the same gate, so no producer can observe the buffer as open
//! after a consumer has observed the Shutdown sentinel.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

enum Item<T> {
    Value(T),
    Shutdown,
}

/// What [`BufferConsumer::get`] returns: either the next value, or the
/// poison pill signalling that no further values will arrive.
pub enum Received<T> {
    Value(T),
    Shutdown,
}

struct Shared {
    closed: Mutex<bool>,
}

/// The producer (put) side of a buffer. Cheaply cloneable.
pub struct Buffer<T> {
    tx: mpsc::Sender<Item<T>>,
    shared: Arc<Shared>,
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// The consumer (get) side of a buffer. Not cloneable: one task owns it.
pub struct BufferConsumer<T> {
    rx: mpsc::Receiver<Item<T>>,
}

impl<T: Send + 'static> Buffer<T> {
    pub fn new(capacity: usize) -> (Buffer<T>, BufferConsumer<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            closed: Mutex::new(false),
        });
        (Buffer { tx, shared }, BufferConsumer { rx })
    }

    /// Enqueue a value. Blocks while the buffer is at capacity.
    ///
    /// Returns [`Error::BufferClosed`] if the buffer has already been
    /// closed; this indicates the producer outlived the consumer and should
    /// be logged once by the caller, per the error taxonomy.
    pub async fn put(&self, value: T) -> Result<()> {
        let closed = self.shared.closed.lock().await;
        if *closed {
            return Err(Error::BufferClosed);
        }
        // Held across the send so a concurrent `close()` cannot enqueue its
        // sentinel ahead of this value.
        self.tx
            .send(Item::Value(value))
            .await
            .map_err(|_| Error::BufferClosed)
    }

    /// Close the buffer: mark it non-accepting and enqueue one Shutdown
    /// sentinel for the consumer. Idempotent.
    pub async fn close(&self) {
        let mut closed = self.shared.closed.lock().await;
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.tx.send(Item::Shutdown).await;
    }
}

impl<T> BufferConsumer<T> {
    /// Block until a value arrives or the buffer is closed.
    ///
    /// After returning [`Received::Shutdown`] once, every subsequent call
    /// returns [`Received::Shutdown`] again (the underlying channel is
    /// exhausted), so callers can simply `break` on the first one.
    pub async fn get(&mut self) -> Received<T> {
        match self.rx.recv().await {
            Some(Item::Value(v)) => Received::Value(v),
            Some(Item::Shutdown) | None => Received::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order() {
        let (buf, mut rx) = Buffer::new(8);
        for i in 0..5 {
            buf.put(i).await.unwrap();
        }
        for i in 0..5 {
            match rx.get().await {
                Received::Value(v) => assert_eq!(v, i),
                Received::Shutdown => panic!("unexpected shutdown"),
            }
        }
    }

    #[tokio::test]
    async fn drains_then_shuts_down_exactly_once() {
        let (buf, mut rx) = Buffer::new(8);
        buf.put(1).await.unwrap();
        buf.put(2).await.unwrap();
        buf.close().await;

        assert!(matches!(rx.get().await, Received::Value(1)));
        assert!(matches!(rx.get().await, Received::Value(2)));
        assert!(matches!(rx.get().await, Received::Shutdown));
        assert!(matches!(rx.get().await, Received::Shutdown));
    }

    #[tokio::test]
    async fn put_after_close_fails() {
        let (buf, _rx) = Buffer::new(8);
        buf.close().await;
        assert!(matches!(buf.put(1).await, Err(Error::BufferClosed)));
    }
}
