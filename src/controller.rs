//! The façade state machine: `new -> starting -> running -> stopping ->
//! stopped`. [`Controller`] owns every buffer, registry, listener table
//! and the [`NappManager`], and is the only thing a binary entry point
//! talks to.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::connection::{ConnectionIdGenerator, ConnectionRegistry};
use crate::error::{Error, Result};
use crate::event::{AppEventEnvelope, MsgEvent, RawEvent};
use crate::frame::Codec;
use crate::handlers;
use crate::listener::ListenerTable;
use crate::napp::{Capabilities, NApp, NappFactory, NappManager};
use crate::server;
use crate::switch::SwitchRegistry;

/// Process exit codes: a clean stop is `0`; a bind failure or a
/// shutdown that overran its grace period are distinct non-zero codes so a
/// supervising process can tell them apart.
pub const EXIT_OK: i32 = 0;
pub const EXIT_BIND_FAILURE: i32 = 1;
pub const EXIT_SHUTDOWN_TIMEOUT: i32 = 2;

/// Map a `start`/`stop` result to the process exit code a binary should
/// return.
pub fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(Error::BindFailure(_)) => EXIT_BIND_FAILURE,
        Err(Error::ShutdownTimeout) => EXIT_SHUTDOWN_TIMEOUT,
        Err(_) => EXIT_BIND_FAILURE,
    }
}

enum State<C: Codec> {
    New,
    Running(Running<C>),
    Stopped,
}

struct Running<C: Codec> {
    local_addr: SocketAddr,
    connections: Arc<ConnectionRegistry>,
    #[allow(dead_code)]
    switches: Arc<SwitchRegistry>,
    napps: Arc<NappManager<C::Message>>,
    raw_events: Buffer<RawEvent>,
    msg_in_events: Buffer<MsgEvent<C::Message>>,
    msg_out_events: Buffer<MsgEvent<C::Message>>,
    app_events: Buffer<AppEventEnvelope>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: mpsc::Receiver<()>,
    accept_task: JoinHandle<Result<()>>,
    raw_task: JoinHandle<()>,
    msg_in_task: JoinHandle<()>,
    msg_out_task: JoinHandle<()>,
    app_task: JoinHandle<()>,
}

/// The controller core. Generic over the wire [`Codec`]; a deployment
/// picks one concrete codec (e.g. [`crate::frame::OpenFlowHelloCodec`])
/// and instantiates `Controller<TheirCodec>`.
pub struct Controller<C: Codec> {
    config: Config,
    codec: Arc<C>,
    pending_factories: Mutex<Vec<(String, NappFactory<C::Message>)>>,
    state: Mutex<State<C>>,
}

impl<C: Codec> Controller<C> {
    pub fn new(config: Config, codec: C) -> Self {
        Self {
            config,
            codec: Arc::new(codec),
            pending_factories: Mutex::new(Vec::new()),
            state: Mutex::new(State::New),
        }
    }

    /// Register a statically-linked NApp factory. Only valid before
    /// [`Controller::start`]; the loaded set is fixed once the
    /// controller is running.
    pub fn register_napp<F>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(Capabilities<C::Message>) -> anyhow::Result<Box<dyn NApp<C::Message>>>
            + Send
            + Sync
            + 'static,
    {
        {
            let state = self.state.lock().unwrap();
            if !matches!(*state, State::New) {
                return Err(Error::InvalidState);
            }
        }
        self.pending_factories
            .lock()
            .unwrap()
            .push((name.into(), Arc::new(factory)));
        Ok(())
    }

    /// Bind the listener, allocate buffers and registries, load every
    /// registered NApp, and spawn the four handler stages plus the accept
    /// loop. Only valid in the `new` state.
    pub async fn start(&self) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if !matches!(*state, State::New) {
                return Err(Error::InvalidState);
            }
        }

        let addr = SocketAddr::new(self.config.listen, self.config.port);
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|_| Error::BindFailure(addr))?;
        let local_addr = tcp_listener.local_addr().unwrap_or(addr);

        let connections = Arc::new(ConnectionRegistry::new());
        let switches = Arc::new(SwitchRegistry::new());
        let id_gen = Arc::new(ConnectionIdGenerator::new());

        let (raw_tx, raw_rx) = Buffer::new(self.config.buffer_capacity);
        let (msg_in_tx, msg_in_rx) = Buffer::new(self.config.buffer_capacity);
        let (msg_out_tx, msg_out_rx) = Buffer::new(self.config.buffer_capacity);
        let (app_tx, app_rx) = Buffer::new(self.config.buffer_capacity);

        let raw_listeners = Arc::new(ListenerTable::new());
        let msg_in_listeners = Arc::new(ListenerTable::new());
        let msg_out_listeners = Arc::new(ListenerTable::new());
        let app_listeners = Arc::new(ListenerTable::new());

        let caps = Capabilities {
            msg_in: msg_in_tx.clone(),
            msg_out: msg_out_tx.clone(),
            app: app_tx.clone(),
        };
        let mut napps = NappManager::new(
            caps,
            raw_listeners.clone(),
            msg_in_listeners.clone(),
            msg_out_listeners.clone(),
            app_listeners.clone(),
        );
        for (name, factory) in self.pending_factories.lock().unwrap().drain(..) {
            napps.register_factory_arc(name, factory);
        }
        napps.load_all();
        let napps = Arc::new(napps);

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        let mut tcp_accept = server::Listener::new(
            tcp_listener,
            connections.clone(),
            id_gen.clone(),
            raw_tx.clone(),
            app_tx.clone(),
            self.config.max_frame_bytes,
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
        );
        let mut accept_shutdown = notify_shutdown.subscribe();
        let accept_task: JoinHandle<Result<()>> = tokio::spawn(async move {
            tokio::select! {
                res = tcp_accept.run() => res,
                _ = accept_shutdown.recv() => Ok(()),
            }
        });

        let raw_task = tokio::spawn(handlers::raw_handler(
            raw_rx,
            msg_in_tx.clone(),
            app_tx.clone(),
            raw_listeners.clone(),
            self.codec.clone(),
        ));
        let msg_in_task = tokio::spawn(handlers::msg_in_handler(msg_in_rx, msg_in_listeners.clone()));
        let msg_out_task = tokio::spawn(handlers::msg_out_handler(
            msg_out_rx,
            msg_out_listeners.clone(),
            connections.clone(),
            self.codec.clone(),
        ));
        let app_task = tokio::spawn(handlers::app_handler(
            app_rx,
            app_listeners.clone(),
            switches.clone(),
            connections.clone(),
            app_tx.clone(),
        ));

        tracing::info!(%local_addr, "controller started");

        let running = Running {
            local_addr,
            connections,
            switches,
            napps,
            raw_events: raw_tx,
            msg_in_events: msg_in_tx,
            msg_out_events: msg_out_tx,
            app_events: app_tx,
            notify_shutdown,
            shutdown_complete_tx,
            shutdown_complete_rx,
            accept_task,
            raw_task,
            msg_in_task,
            msg_out_task,
            app_task,
        };

        *self.state.lock().unwrap() = State::Running(running);
        Ok(())
    }

    /// The address actually bound, once running (useful when `port: 0`
    /// asked the OS to pick one).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().unwrap() {
            State::Running(r) => Some(r.local_addr),
            _ => None,
        }
    }

    /// Drain and stop everything within the configured grace period:
    /// stop accepting connections, close every live socket, drain each
    /// buffer stage in turn, and unload every non-core NApp. Only valid
    /// in the `running` state.
    pub async fn stop(&self) -> Result<()> {
        let running = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, State::Stopped) {
                State::Running(r) => r,
                other => {
                    *state = other;
                    return Err(Error::InvalidState);
                }
            }
        };

        let grace = Duration::from_secs(self.config.shutdown_grace_seconds);
        let sequence = Self::drain(running);
        match tokio::time::timeout(grace, sequence).await {
            Ok(()) => {
                tracing::info!("controller stopped");
                Ok(())
            }
            Err(_) => {
                tracing::error!("shutdown grace period elapsed before all tasks exited");
                Err(Error::ShutdownTimeout)
            }
        }
    }

    async fn drain(running: Running<C>) {
        let Running {
            connections,
            napps,
            raw_events,
            msg_in_events,
            msg_out_events,
            app_events,
            notify_shutdown,
            shutdown_complete_tx,
            mut shutdown_complete_rx,
            accept_task,
            raw_task,
            msg_in_task,
            msg_out_task,
            app_task,
            ..
        } = running;

        // Stop accepting new work and tell every connection reader to
        // observe shutdown on its next select.
        let _ = notify_shutdown.send(());
        for id in connections.ids() {
            if let Some(handle) = connections.get(id) {
                handle.shutdown().await;
            }
        }

        // Dropping the controller's own sender lets `shutdown_complete_rx`
        // resolve with `None` once every reader's clone is also dropped.
        drop(shutdown_complete_tx);
        let _ = shutdown_complete_rx.recv().await;
        let _ = accept_task.await;

        // Drain the pipeline stage by stage: closing a buffer lets its
        // handler finish whatever is already queued, then exit.
        raw_events.close().await;
        let _ = raw_task.await;
        msg_in_events.close().await;
        let _ = msg_in_task.await;
        msg_out_events.close().await;
        let _ = msg_out_task.await;
        app_events.close().await;
        let _ = app_task.await;

        napps.unload_all_non_core();
    }
}
