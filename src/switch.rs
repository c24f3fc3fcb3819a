//! The switch registry.
//!
//! Guarded the same way as [`crate::connection::ConnectionRegistry`]: a
//! single `RwLock`, writers serialize, readers don't block each other.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::connection::ConnectionId;
use crate::error::{Error, Result};

/// 64-bit datapath identifier a switch advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dpid(pub u64);

impl std::fmt::Display for Dpid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// A single switch's state as tracked by the controller.
///
/// In addition to the current connection and liveness flag, a switch
/// carries an optional `features` field for free-form metadata NApps
/// may attach, since a real deployment needs somewhere to stash what a
/// features-reply taught it about the switch.
#[derive(Debug, Clone)]
pub struct Switch {
    pub dpid: Dpid,
    connection: Option<ConnectionId>,
    connected: bool,
    /// Free-form feature metadata NApps may attach (e.g. port descriptions
    /// learned from a features-reply); opaque to the core.
    pub features: Option<String>,
}

impl Switch {
    pub fn new(dpid: Dpid, connection: ConnectionId) -> Self {
        Self {
            dpid,
            connection: Some(connection),
            connected: true,
            features: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }
}

/// Mapping from [`Dpid`] to [`Switch`].
///
/// Invariant: at most one *connected* switch entry per dpid at any
/// instant.
#[derive(Default)]
pub struct SwitchRegistry {
    inner: RwLock<HashMap<Dpid, Switch>>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly connected switch, or rebind an existing disconnected
    /// entry to the new connection.
    ///
    /// Fails with [`Error::DuplicateSwitch`] if an entry for this dpid is
    /// still connected.
    pub fn add_or_rebind(&self, dpid: Dpid, connection: ConnectionId) -> Result<()> {
        let mut map = self.inner.write().unwrap();
        match map.get_mut(&dpid) {
            Some(existing) if existing.connected => Err(Error::DuplicateSwitch(dpid.0)),
            Some(existing) => {
                existing.connection = Some(connection);
                existing.connected = true;
                Ok(())
            }
            None => {
                map.insert(dpid, Switch::new(dpid, connection));
                Ok(())
            }
        }
    }

    /// Mark a switch disconnected. Fails with
    /// [`Error::UnknownSwitch`] if no entry exists for this dpid.
    pub fn disconnect(&self, dpid: Dpid) -> Result<()> {
        let mut map = self.inner.write().unwrap();
        match map.get_mut(&dpid) {
            Some(switch) => {
                switch.connected = false;
                switch.connection = None;
                Ok(())
            }
            None => Err(Error::UnknownSwitch(dpid.0)),
        }
    }

    /// Look up a switch's dpid by its live connection, used by the
    /// connection-lost path to find which switch, if any, just went away.
    pub fn dpid_for_connection(&self, connection: ConnectionId) -> Option<Dpid> {
        self.inner
            .read()
            .unwrap()
            .values()
            .find(|s| s.connected && s.connection == Some(connection))
            .map(|s| s.dpid)
    }

    pub fn get(&self, dpid: Dpid) -> Option<Switch> {
        self.inner.read().unwrap().get(&dpid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(n: u64) -> ConnectionId {
        // ConnectionId has no public constructor; go through the generator
        // used everywhere else so tests exercise the real type.
        let gen = crate::connection::ConnectionIdGenerator::new();
        for _ in 0..n {
            gen.next();
        }
        gen.next()
    }

    #[test]
    fn rejects_duplicate_live_switch() {
        let reg = SwitchRegistry::new();
        let dpid = Dpid(1);
        reg.add_or_rebind(dpid, cid(0)).unwrap();
        let err = reg.add_or_rebind(dpid, cid(1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateSwitch(_)));
    }

    #[test]
    fn rebinds_after_disconnect() {
        let reg = SwitchRegistry::new();
        let dpid = Dpid(2);
        let first = cid(0);
        reg.add_or_rebind(dpid, first).unwrap();
        reg.disconnect(dpid).unwrap();
        assert!(!reg.get(dpid).unwrap().is_connected());

        let second = cid(1);
        reg.add_or_rebind(dpid, second).unwrap();
        let switch = reg.get(dpid).unwrap();
        assert!(switch.is_connected());
        assert_eq!(switch.connection(), Some(second));
    }

    #[test]
    fn disconnect_unknown_switch_fails() {
        let reg = SwitchRegistry::new();
        let err = reg.disconnect(Dpid(99)).unwrap_err();
        assert!(matches!(err, Error::UnknownSwitch(_)));
    }
}
