use tokio::sync::broadcast::Receiver;

/// Listens for the controller's shutdown signal.
///
/// Shutdown is signalled using a `Receiver`. Only a single value is ever
/// sent. Once a value has been sent via the broadcast channel, the accept
/// loop and every connection reader should stop.
#[derive(Debug)]
pub(crate) struct Shutdown {
    /// `true` if the shutdown signal has been received.
    is_shutdown: bool,
    /// The receive half of the channel used to listen for shutdown signals.
    notify: Receiver<()>,
}

impl Shutdown {
    /// Creates a new `Shutdown` backed by the given `Receiver`.
    pub(crate) fn new(notify: Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub(crate) async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // Cannot receive a lag error: only one value is ever sent.
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
