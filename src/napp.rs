//! NApp lifecycle: the `NApp` trait, its capability record, and the
//! manager that loads/unloads NApps and wires their listeners.
//!
//! Dynamic loading of a scripted bundle off disk is replaced here with
//! statically linked NApps selected by configuration. `NappManager` is
//! built from an in-process factory table (`name -> fn() -> Box<dyn
//! NApp<M>>`) instead of scanning `napps_dir`; see `DESIGN.md` for the
//! path scanning that would layer on top of this without touching the
//! lifecycle semantics below.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;
use crate::event::{AppEventEnvelope, MsgEvent, ProtocolMessage, RawEvent};
use crate::error::{Error, Result};
use crate::listener::ListenerTable;

/// The put-capable handles a NApp receives at construction: one per
/// outbound buffer. A NApp emits work by calling these, never by
/// touching the core's internals directly.
#[derive(Clone)]
pub struct Capabilities<M: ProtocolMessage> {
    pub msg_in: Buffer<MsgEvent<M>>,
    pub msg_out: Buffer<MsgEvent<M>>,
    pub app: Buffer<AppEventEnvelope>,
}

/// Lets a NApp declare its listener set at load time: a registry mapping
/// an event-type-name regex to an ordered list of callbacks.
/// Registrations made through this type are automatically
/// tagged with the owning NApp's id, so [`NappManager::unload`] can remove
/// exactly the ones it contributed.
pub struct Registrar<'a, M: ProtocolMessage> {
    napp_id: &'a str,
    raw: &'a ListenerTable<RawEvent>,
    msg_in: &'a ListenerTable<MsgEvent<M>>,
    msg_out: &'a ListenerTable<MsgEvent<M>>,
    app: &'a ListenerTable<AppEventEnvelope>,
}

impl<'a, M: ProtocolMessage> Registrar<'a, M> {
    pub fn on_raw<F>(&mut self, pattern: &str, callback: F) -> std::result::Result<(), regex::Error>
    where
        F: Fn(&RawEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.raw.register(pattern, self.napp_id, Arc::new(callback))
    }

    pub fn on_msg_in<F>(&mut self, pattern: &str, callback: F) -> std::result::Result<(), regex::Error>
    where
        F: Fn(&MsgEvent<M>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.msg_in
            .register(pattern, self.napp_id, Arc::new(callback))
    }

    pub fn on_msg_out<F>(&mut self, pattern: &str, callback: F) -> std::result::Result<(), regex::Error>
    where
        F: Fn(&MsgEvent<M>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.msg_out
            .register(pattern, self.napp_id, Arc::new(callback))
    }

    pub fn on_app<F>(&mut self, pattern: &str, callback: F) -> std::result::Result<(), regex::Error>
    where
        F: Fn(&AppEventEnvelope) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.app.register(pattern, self.napp_id, Arc::new(callback))
    }
}

/// A network application: a pluggable unit of controller logic that
/// registers listeners and reacts to events.
pub trait NApp<M: ProtocolMessage>: Send {
    /// Bundle name; doubles as the NApp id used to tag listener
    /// registrations and to remove them on unload.
    fn name(&self) -> &str;

    /// Core NApps are exempt from `unload_all` but may still be
    /// unloaded individually by name.
    fn is_core(&self) -> bool {
        false
    }

    /// Declare this NApp's listeners. Called once, at load time.
    fn register(&self, registrar: &mut Registrar<'_, M>);

    /// Called exactly once, on unload.
    fn shutdown(&mut self);
}

/// A NApp constructor, keyed by name in [`NappManager`]'s factory table.
pub type NappFactory<M> =
    Arc<dyn Fn(Capabilities<M>) -> anyhow::Result<Box<dyn NApp<M>>> + Send + Sync>;

struct Loaded<M: ProtocolMessage> {
    handle: Box<dyn NApp<M>>,
}

/// Loads/unloads NApps and keeps the four listener tables in sync with
/// which NApps are currently loaded.
pub struct NappManager<M: ProtocolMessage> {
    factories: HashMap<String, NappFactory<M>>,
    loaded: Mutex<HashMap<String, Loaded<M>>>,
    caps: Capabilities<M>,
    raw_listeners: Arc<ListenerTable<RawEvent>>,
    msg_in_listeners: Arc<ListenerTable<MsgEvent<M>>>,
    msg_out_listeners: Arc<ListenerTable<MsgEvent<M>>>,
    app_listeners: Arc<ListenerTable<AppEventEnvelope>>,
}

impl<M: ProtocolMessage> NappManager<M> {
    pub fn new(
        caps: Capabilities<M>,
        raw_listeners: Arc<ListenerTable<RawEvent>>,
        msg_in_listeners: Arc<ListenerTable<MsgEvent<M>>>,
        msg_out_listeners: Arc<ListenerTable<MsgEvent<M>>>,
        app_listeners: Arc<ListenerTable<AppEventEnvelope>>,
    ) -> Self {
        Self {
            factories: HashMap::new(),
            loaded: Mutex::new(HashMap::new()),
            caps,
            raw_listeners,
            msg_in_listeners,
            msg_out_listeners,
            app_listeners,
        }
    }

    /// Register a factory under `name`. Stands in for "a bundle exists at
    /// `<napps_dir>/<name>/main.ext`" in the statically-linked redesign.
    pub fn register_factory<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Capabilities<M>) -> anyhow::Result<Box<dyn NApp<M>>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Same as [`NappManager::register_factory`], for a factory a caller
    /// already holds behind an `Arc` (used when a [`Controller`][crate::controller::Controller]
    /// hands off factories it collected before `start()`).
    pub fn register_factory_arc(&mut self, name: impl Into<String>, factory: NappFactory<M>) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate the named NApp and register its listeners.
    pub fn load(&self, name: &str) -> Result<()> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NAppLoadError(name.to_string(), "no such napp registered".into()))?
            .clone();
        let caps = self.caps.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| factory(caps)));
        let napp = match outcome {
            Ok(Ok(napp)) => napp,
            Ok(Err(source)) => return Err(Error::NAppLoadError(name.to_string(), source.to_string())),
            Err(_) => {
                return Err(Error::NAppLoadError(
                    name.to_string(),
                    "constructor panicked".into(),
                ))
            }
        };

        {
            let mut registrar = Registrar {
                napp_id: name,
                raw: &self.raw_listeners,
                msg_in: &self.msg_in_listeners,
                msg_out: &self.msg_out_listeners,
                app: &self.app_listeners,
            };
            napp.register(&mut registrar);
        }

        self.loaded
            .lock()
            .unwrap()
            .insert(name.to_string(), Loaded { handle: napp });
        Ok(())
    }

    /// Load every registered factory. A single broken NApp is logged and
    /// skipped; it never prevents the rest from loading.
    pub fn load_all(&self) {
        let names: Vec<String> = self.factories.keys().cloned().collect();
        for name in names {
            if let Err(err) = self.load(&name) {
                tracing::error!(napp = %name, error = %err, "failed to load napp");
            }
        }
    }

    /// Remove `name`'s listener registrations, call its `shutdown` hook,
    /// and drop its handle.
    pub fn unload(&self, name: &str) -> Result<()> {
        let mut loaded = self
            .loaded
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| Error::NAppLoadError(name.to_string(), "not loaded".into()))?;

        self.raw_listeners.unregister_napp(name);
        self.msg_in_listeners.unregister_napp(name);
        self.msg_out_listeners.unregister_napp(name);
        self.app_listeners.unregister_napp(name);

        loaded.handle.shutdown();
        Ok(())
    }

    /// Unload every non-core NApp; core NApps are exempt from bulk
    /// unload but may be unloaded individually.
    pub fn unload_all_non_core(&self) {
        let names: Vec<String> = {
            let loaded = self.loaded.lock().unwrap();
            loaded
                .iter()
                .filter(|(_, l)| !l.handle.is_core())
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in names {
            if let Err(err) = self.unload(&name) {
                tracing::error!(napp = %name, error = %err, "failed to unload napp");
            }
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.lock().unwrap().contains_key(name)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestMsg;

    impl ProtocolMessage for TestMsg {
        fn type_name(&self) -> &'static str {
            "Test"
        }
    }

    fn test_caps() -> Capabilities<TestMsg> {
        Capabilities {
            msg_in: Buffer::new(8).0,
            msg_out: Buffer::new(8).0,
            app: Buffer::new(8).0,
        }
    }

    fn test_manager() -> NappManager<TestMsg> {
        NappManager::new(
            test_caps(),
            Arc::new(ListenerTable::new()),
            Arc::new(ListenerTable::new()),
            Arc::new(ListenerTable::new()),
            Arc::new(ListenerTable::new()),
        )
    }

    struct RecordingNApp {
        name: &'static str,
        core: bool,
        shutdowns: Arc<AtomicUsize>,
    }

    impl NApp<TestMsg> for RecordingNApp {
        fn name(&self) -> &str {
            self.name
        }

        fn is_core(&self) -> bool {
            self.core
        }

        fn register(&self, registrar: &mut Registrar<'_, TestMsg>) {
            registrar.on_msg_in(".*", |_| Ok(())).unwrap();
        }

        fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn load_registers_listeners_and_unload_removes_them() {
        let mut manager = test_manager();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let s = shutdowns.clone();
        manager.register_factory("echo", move |_caps| {
            Ok(Box::new(RecordingNApp {
                name: "echo",
                core: false,
                shutdowns: s.clone(),
            }) as Box<dyn NApp<TestMsg>>)
        });

        manager.load("echo").unwrap();
        assert!(manager.is_loaded("echo"));
        assert_eq!(manager.msg_in_listeners.len(), 1);

        manager.unload("echo").unwrap();
        assert!(!manager.is_loaded("echo"));
        assert_eq!(manager.msg_in_listeners.len(), 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_all_skips_a_panicking_factory_but_loads_the_rest() {
        let mut manager = test_manager();
        manager.register_factory("boom", |_caps| panic!("factory exploded"));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let s = shutdowns.clone();
        manager.register_factory("fine", move |_caps| {
            Ok(Box::new(RecordingNApp {
                name: "fine",
                core: false,
                shutdowns: s.clone(),
            }) as Box<dyn NApp<TestMsg>>)
        });

        manager.load_all();

        assert!(!manager.is_loaded("boom"));
        assert!(manager.is_loaded("fine"));
        assert_eq!(manager.loaded_count(), 1);
    }

    #[test]
    fn unload_all_non_core_spares_core_napps() {
        let mut manager = test_manager();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let s1 = shutdowns.clone();
        manager.register_factory("core_napp", move |_caps| {
            Ok(Box::new(RecordingNApp {
                name: "core_napp",
                core: true,
                shutdowns: s1.clone(),
            }) as Box<dyn NApp<TestMsg>>)
        });
        let s2 = shutdowns.clone();
        manager.register_factory("regular", move |_caps| {
            Ok(Box::new(RecordingNApp {
                name: "regular",
                core: false,
                shutdowns: s2.clone(),
            }) as Box<dyn NApp<TestMsg>>)
        });
        manager.load_all();

        manager.unload_all_non_core();

        assert!(manager.is_loaded("core_napp"));
        assert!(!manager.is_loaded("regular"));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }
}
