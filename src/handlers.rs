//! The four parallel handler stages.
//!
//! Each stage is a plain async function meant to be `tokio::spawn`ed once
//! by the controller; each owns exactly one [`BufferConsumer`] and runs
//! until it observes [`Received::Shutdown`]. Dispatch within a stage is
//! synchronous; parallelism across stages comes from running all four
//! concurrently as separate tasks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::{Buffer, BufferConsumer, Received};
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::Error;
use crate::event::{
    AppEvent, AppEventEnvelope, ConnectionLost, MsgEvent, NewConnection, ProtocolMessage, RawEvent,
    SwitchDown, SwitchUp,
};
use crate::frame::Codec;
use crate::listener::{self, ListenerTable};
use crate::switch::{Dpid, SwitchRegistry};

/// Raw-event handler: decode, promote to MsgIn, and emit
/// `NewConnection` ahead of a connection's first decoded message.
pub async fn raw_handler<C: Codec>(
    mut raw_rx: BufferConsumer<RawEvent>,
    msg_in: Buffer<MsgEvent<C::Message>>,
    app: Buffer<AppEventEnvelope>,
    raw_listeners: Arc<ListenerTable<RawEvent>>,
    codec: Arc<C>,
) {
    tracing::info!("raw event handler started");
    let mut seen: HashSet<ConnectionId> = HashSet::new();

    loop {
        let event = match raw_rx.get().await {
            Received::Value(e) => e,
            Received::Shutdown => break,
        };

        if seen.insert(event.connection) {
            // First frame on this connection: the header's xid is the only
            // thing the core can peek before a real handshake; it doubles
            // as the dpid this connection advertises (see DESIGN.md).
            let new_connection = AppEventEnvelope {
                connection: Some(event.connection),
                timestamp: event.timestamp,
                payload: AppEvent::NewConnection(NewConnection {
                    connection: event.connection,
                    dpid_hint: Dpid(event.header.xid as u64),
                }),
            };
            if app.put(new_connection).await.is_err() {
                tracing::warn!(connection = %event.connection, "app buffer closed while emitting NewConnection");
            }
        }

        match codec.decode(&event.header, &event.body) {
            Ok(message) => {
                let msg_in_event = MsgEvent {
                    connection: event.connection,
                    timestamp: event.timestamp,
                    message,
                };
                if msg_in.put(msg_in_event).await.is_err() {
                    tracing::warn!(connection = %event.connection, "msg_in buffer closed while promoting raw event");
                }
            }
            Err(err) => {
                tracing::warn!(connection = %event.connection, error = %err, "failed to decode frame");
            }
        }

        listener::dispatch(&raw_listeners, RawEvent::TYPE_NAME, &event);
    }
    tracing::info!("raw event handler stopped");
}

/// Msg-in handler: pure fan-out through listener dispatch.
pub async fn msg_in_handler<M: ProtocolMessage>(
    mut rx: BufferConsumer<MsgEvent<M>>,
    listeners: Arc<ListenerTable<MsgEvent<M>>>,
) {
    tracing::info!("msg_in event handler started");
    loop {
        let event = match rx.get().await {
            Received::Value(e) => e,
            Received::Shutdown => break,
        };
        let type_name = event.message.type_name();
        listener::dispatch(&listeners, type_name, &event);
    }
    tracing::info!("msg_in event handler stopped");
}

/// Msg-out handler: write to the wire, then fan out.
pub async fn msg_out_handler<C: Codec>(
    mut rx: BufferConsumer<MsgEvent<C::Message>>,
    listeners: Arc<ListenerTable<MsgEvent<C::Message>>>,
    connections: Arc<ConnectionRegistry>,
    codec: Arc<C>,
) {
    tracing::info!("msg_out event handler started");
    loop {
        let event = match rx.get().await {
            Received::Value(e) => e,
            Received::Shutdown => break,
        };

        match codec.encode(&event.message) {
            Ok((header, body)) => {
                if let Err(err) = connections.write_to(event.connection, &header, &body).await {
                    tracing::warn!(connection = %event.connection, error = %err, "dropping msg_out for vanished connection");
                }
            }
            Err(err) => {
                tracing::warn!(connection = %event.connection, error = %err, "failed to encode outbound message");
            }
        }

        let type_name = event.message.type_name();
        listener::dispatch(&listeners, type_name, &event);
    }
    tracing::info!("msg_out event handler stopped");
}

/// App handler: binds/unbinds switches for the two controller-internal
/// lifecycle events, then fans every event out through listener dispatch.
///
/// NewConnection and ConnectionLost are handled inline rather than as
/// ordinary listener-table registrations, because the SwitchUp/SwitchDown
/// they produce must be enqueued *before* this loop moves on to the next
/// event: requeuing via a detached task would let a later event (another
/// NewConnection on the same dpid, say) overtake it, breaking the
/// SwitchUp/SwitchDown ordering NApps rely on. Since `app_handler` is the
/// sole consumer of `app_buffer`, awaiting the put here is enough to
/// guarantee that order.
pub async fn app_handler(
    mut rx: BufferConsumer<AppEventEnvelope>,
    listeners: Arc<ListenerTable<AppEventEnvelope>>,
    switches: Arc<SwitchRegistry>,
    connections: Arc<ConnectionRegistry>,
    app_buffer: Buffer<AppEventEnvelope>,
) {
    tracing::info!("app event handler started");
    loop {
        let event = match rx.get().await {
            Received::Value(e) => e,
            Received::Shutdown => break,
        };

        let follow_up = match &event.payload {
            AppEvent::NewConnection(nc) => {
                handle_new_connection(nc, &switches, &connections).await
            }
            AppEvent::ConnectionLost(lost) => handle_connection_lost(lost, &switches),
            _ => None,
        };

        let type_name = event.payload.type_name();
        listener::dispatch(&listeners, type_name, &event);

        if let Some(follow_up) = follow_up {
            if app_buffer.put(follow_up).await.is_err() {
                tracing::warn!("app buffer closed while emitting switch lifecycle event");
            }
        }
    }
    tracing::info!("app event handler stopped");
}

/// Bind (or rebind) the switch this connection advertises. On success,
/// returns the `SwitchUp` event to enqueue. On a duplicate, closes the
/// new connection and returns `None` — awaited here, not spawned, so the
/// connection is gone before `app_handler` moves on to the next event.
async fn handle_new_connection(
    nc: &NewConnection,
    switches: &SwitchRegistry,
    connections: &ConnectionRegistry,
) -> Option<AppEventEnvelope> {
    let dpid = nc.dpid_hint;
    match switches.add_or_rebind(dpid, nc.connection) {
        Ok(()) => Some(AppEventEnvelope {
            connection: None,
            timestamp: Instant::now(),
            payload: AppEvent::SwitchUp(SwitchUp { dpid }),
        }),
        Err(Error::DuplicateSwitch(_)) => {
            tracing::warn!(%dpid, connection = %nc.connection, "rejecting duplicate switch, closing connection");
            if let Some(handle) = connections.get(nc.connection) {
                handle.shutdown().await;
            }
            connections.remove(nc.connection);
            None
        }
        Err(err) => {
            tracing::error!(%dpid, error = %err, "unexpected error binding switch");
            None
        }
    }
}

/// Mark the switch behind a lost connection disconnected. Returns the
/// `SwitchDown` event to enqueue, if one was actually bound to it.
fn handle_connection_lost(
    lost: &ConnectionLost,
    switches: &SwitchRegistry,
) -> Option<AppEventEnvelope> {
    let dpid = switches.dpid_for_connection(lost.connection)?;
    if let Err(err) = switches.disconnect(dpid) {
        tracing::error!(%dpid, error = %err, "unexpected error disconnecting switch");
        return None;
    }
    Some(AppEventEnvelope {
        connection: None,
        timestamp: Instant::now(),
        payload: AppEvent::SwitchDown(SwitchDown { dpid }),
    })
}
