use thiserror::Error;

/// Taxonomy of everything that can go wrong in the controller core.
///
/// Most variants are logged and swallowed at the point they occur (see the
/// handler modules); only [`Error::BindFailure`] and a grace-period timeout
/// in [`crate::controller`] are surfaced to the façade caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incomplete frame")]
    IncompleteFrame,

    #[error("controller operation invalid in current state")]
    InvalidState,

    #[error("failed to bind listener on {0}")]
    BindFailure(std::net::SocketAddr),

    #[error("switch {0:#x} is already connected")]
    DuplicateSwitch(u64),

    #[error("switch {0:#x} is not registered")]
    UnknownSwitch(u64),

    #[error("frame decode failed: {0}")]
    DecodeError(String),

    #[error("listener for {napp} on event {event} failed: {source}")]
    ListenerError {
        napp: String,
        event: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to load napp `{0}`: {1}")]
    NAppLoadError(String, String),

    #[error("put on a closed buffer")]
    BufferClosed,

    #[error("frame of {actual} bytes exceeds max_frame_bytes ({max})")]
    OversizeFrame { actual: usize, max: usize },

    #[error("connection {0} is not registered")]
    UnknownConnection(u64),

    #[error("graceful shutdown did not complete within the configured grace period")]
    ShutdownTimeout,
}

pub type Result<T> = std::result::Result<T, Error>;
