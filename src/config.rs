use std::net::IpAddr;
use std::path::PathBuf;

/// Configuration consumed by [`crate::controller::Controller::start`].
///
/// Built by the binary entry point (typically from `clap` arguments); the
/// core never reads environment variables or argv directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the TCP listener on.
    pub listen: IpAddr,
    /// Port to bind the TCP listener on.
    pub port: u16,
    /// Maximum accepted OpenFlow frame size in bytes, header included.
    pub max_frame_bytes: usize,
    /// Capacity of each of the four event buffers.
    pub buffer_capacity: usize,
    /// Grace period `stop()` waits for handler tasks to exit before giving up.
    pub shutdown_grace_seconds: u64,
    /// Filesystem path NApp bundles would be discovered under.
    ///
    /// The core NApp manager ([`crate::napp::NappManager`]) loads NApps from
    /// an in-process factory registry rather than from disk (see
    /// `DESIGN.md`); this field is retained so the external configuration
    /// surface matches a deployment that later adds a manifest scanner over
    /// this directory.
    pub napps_dir: PathBuf,
}

pub const DEFAULT_PORT: u16 = 6653;
pub const DEFAULT_LISTEN: &str = "0.0.0.0";
pub const DEFAULT_MAX_FRAME_BYTES: usize = 65535;
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.parse().expect("valid default address"),
            port: DEFAULT_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            shutdown_grace_seconds: DEFAULT_SHUTDOWN_GRACE_SECONDS,
            napps_dir: PathBuf::from("napps"),
        }
    }
}
