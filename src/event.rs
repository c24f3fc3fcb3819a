//! The event model: one item type per buffer family.
//!
//! Raw, MsgIn/MsgOut, and App events are deliberately distinct Rust types
//! rather than variants of one big enum — each travels on its own buffer and
//! is consumed by its own handler stage, so there is never a point where code
//! needs to hold "any kind of event" in one hand. Listener dispatch is
//! generic over the event type instead (see [`crate::listener`]).

use crate::connection::ConnectionId;
use crate::switch::Dpid;
use bytes::Bytes;
use std::any::Any;
use std::time::Instant;

/// A decoded (or decodable) OpenFlow message.
///
/// This is the seam at which the codec collaborator plugs in: the core
/// only ever needs a message's wire type name, both to log it and
/// to let NApps subscribe to a specific message type (e.g. `Hello`) rather
/// than to "any MsgIn".
pub trait ProtocolMessage: std::fmt::Debug + Send + 'static {
    fn type_name(&self) -> &'static str;
}

/// Undecoded bytes read from a connection, plus the framing header.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub connection: ConnectionId,
    pub timestamp: Instant,
    pub header: crate::frame::FrameHeader,
    pub body: Bytes,
}

impl RawEvent {
    pub const TYPE_NAME: &'static str = "Raw";
}

/// A decoded protocol message flowing in either direction.
#[derive(Debug, Clone)]
pub struct MsgEvent<M> {
    pub connection: ConnectionId,
    pub timestamp: Instant,
    pub message: M,
}

/// An event internal to the controller/NApp layer.
#[derive(Debug)]
pub struct AppEventEnvelope {
    pub connection: Option<ConnectionId>,
    pub timestamp: Instant,
    pub payload: AppEvent,
}

#[derive(Debug)]
pub enum AppEvent {
    NewConnection(NewConnection),
    ConnectionLost(ConnectionLost),
    SwitchUp(SwitchUp),
    SwitchDown(SwitchDown),
    /// A NApp-defined subtype, carrying its own runtime type name.
    Custom(CustomApp),
}

impl AppEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            AppEvent::NewConnection(_) => "NewConnection",
            AppEvent::ConnectionLost(_) => "ConnectionLost",
            AppEvent::SwitchUp(_) => "SwitchUp",
            AppEvent::SwitchDown(_) => "SwitchDown",
            AppEvent::Custom(c) => c.type_name,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewConnection {
    pub connection: ConnectionId,
    /// The first frame's xid, zero-extended to 64 bits, standing in for
    /// the dpid this connection advertises ahead of any real handshake
    /// (see DESIGN.md).
    pub dpid_hint: Dpid,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLost {
    pub connection: ConnectionId,
}

#[derive(Debug, Clone, Copy)]
pub struct SwitchUp {
    pub dpid: Dpid,
}

#[derive(Debug, Clone, Copy)]
pub struct SwitchDown {
    pub dpid: Dpid,
}

/// A NApp-emitted App event subtype. `payload` is downcast by the NApp that
/// emitted it (or by a NApp that knows the concrete type it subscribes to);
/// the core never inspects it.
#[derive(Debug)]
pub struct CustomApp {
    pub type_name: &'static str,
    pub payload: Box<dyn Any + Send>,
}
