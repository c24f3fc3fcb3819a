//! The TCP accept loop and per-connection frame reader.
//!
//! An accept loop with exponential backoff on transient errors hands each
//! accepted socket to a spawned per-connection task. That task only reads
//! and enqueues `RawEvent`s — there is no per-connection response loop,
//! because replies arrive asynchronously from the msg-out handler stage
//! instead of being paired request/response on the same task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::buffer::Buffer;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionIdGenerator, ConnectionRegistry};
use crate::error::{Error, Result};
use crate::event::{AppEvent, AppEventEnvelope, ConnectionLost, RawEvent};
use crate::frame::FrameReader;
use crate::shutdown::Shutdown;

/// Owns the bound socket and everything a freshly accepted connection needs
/// wired up: an id, a registry slot, and a reader task.
pub struct Listener {
    listener: TcpListener,
    connections: Arc<ConnectionRegistry>,
    id_gen: Arc<ConnectionIdGenerator>,
    raw_events: Buffer<RawEvent>,
    app_events: Buffer<AppEventEnvelope>,
    max_frame_bytes: usize,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: TcpListener,
        connections: Arc<ConnectionRegistry>,
        id_gen: Arc<ConnectionIdGenerator>,
        raw_events: Buffer<RawEvent>,
        app_events: Buffer<AppEventEnvelope>,
        max_frame_bytes: usize,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            listener,
            connections,
            id_gen,
            raw_events,
            app_events,
            max_frame_bytes,
            notify_shutdown,
            shutdown_complete_tx,
        }
    }

    /// Accept inbound connections until a fatal accept error occurs.
    ///
    /// Normal shutdown does not come from this loop returning: the
    /// controller races it against its own shutdown signal and simply
    /// drops it once the signal fires.
    pub async fn run(&mut self) -> Result<()> {
        info!("accepting inbound connections");
        loop {
            let socket = self.accept().await?;
            let peer = socket
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string());

            let id = self.id_gen.next();
            let (read_half, write_half) = socket.into_split();
            self.connections
                .insert(ConnectionHandle::new(id, write_half));

            let mut reader = Reader {
                connection_id: id,
                frame_reader: FrameReader::new(read_half, self.max_frame_bytes),
                raw_events: self.raw_events.clone(),
                app_events: self.app_events.clone(),
                connections: self.connections.clone(),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                debug!(connection = %id, %peer, "accepted inbound connection");
                reader.run().await;
            });
        }
    }

    /// Accept a socket, backing off exponentially on transient errors.
    ///
    /// After the first failure the loop waits 1 second; each subsequent
    /// failure doubles the wait. Giving up after the 6th try (64 seconds)
    /// is treated as fatal and bubbles up to the controller.
    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        error!(%err, "failed to accept inbound connection too many times");
                        return Err(Error::Io(err));
                    }
                    warn!(%err, "accept failed, retrying in {backoff}s");
                }
            }
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

/// Per-connection frame reader. Stops on shutdown, clean EOF, or a frame
/// error, and always emits `ConnectionLost` on its way out.
struct Reader {
    connection_id: ConnectionId,
    frame_reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
    raw_events: Buffer<RawEvent>,
    app_events: Buffer<AppEventEnvelope>,
    connections: Arc<ConnectionRegistry>,
    shutdown: Shutdown,
    _shutdown_complete: mpsc::Sender<()>,
}

impl Reader {
    #[tracing::instrument(skip_all, fields(connection = %self.connection_id))]
    async fn run(&mut self) {
        while !self.shutdown.is_shutdown() {
            let outcome = tokio::select! {
                res = self.frame_reader.read_frame() => res,
                _ = self.shutdown.recv() => break,
            };

            match outcome {
                Ok(Some((header, body))) => {
                    let event = RawEvent {
                        connection: self.connection_id,
                        timestamp: Instant::now(),
                        header,
                        body,
                    };
                    if self.raw_events.put(event).await.is_err() {
                        warn!(connection = %self.connection_id, "raw event buffer closed, dropping connection");
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(connection = %self.connection_id, error = %err, "connection read failed");
                    break;
                }
            }
        }

        self.connections.remove(self.connection_id);
        let lost = AppEventEnvelope {
            connection: Some(self.connection_id),
            timestamp: Instant::now(),
            payload: AppEvent::ConnectionLost(ConnectionLost {
                connection: self.connection_id,
            }),
        };
        if self.app_events.put(lost).await.is_err() {
            warn!(connection = %self.connection_id, "app buffer closed while emitting ConnectionLost");
        }
    }
}
