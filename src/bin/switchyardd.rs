use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use switchyard::{Config, Controller, OpenFlowHelloCodec};

#[derive(Debug, Parser)]
#[command(name = "switchyardd", version, author)]
/// Run the controller core: accept switch connections, dispatch events to
/// NApps, and serve until interrupted.
struct Args {
    /// Address to bind the OpenFlow listener on.
    #[arg(long, default_value = switchyard::config::DEFAULT_LISTEN)]
    listen: IpAddr,
    /// Port to bind the OpenFlow listener on.
    #[arg(long, default_value_t = switchyard::config::DEFAULT_PORT)]
    port: u16,
    /// Maximum accepted frame size in bytes, header included.
    #[arg(long, default_value_t = switchyard::config::DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
    /// Capacity of each internal event buffer.
    #[arg(long, default_value_t = switchyard::config::DEFAULT_BUFFER_CAPACITY)]
    buffer_capacity: usize,
    /// Seconds `stop` waits for in-flight work to drain before giving up.
    #[arg(long, default_value_t = switchyard::config::DEFAULT_SHUTDOWN_GRACE_SECONDS)]
    shutdown_grace_seconds: u64,
    /// Directory NApp bundles would be discovered under (reserved; see
    /// `Config::napps_dir`).
    #[arg(long, default_value = "napps")]
    napps_dir: PathBuf,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config {
        listen: args.listen,
        port: args.port,
        max_frame_bytes: args.max_frame_bytes,
        buffer_capacity: args.buffer_capacity,
        shutdown_grace_seconds: args.shutdown_grace_seconds,
        napps_dir: args.napps_dir,
    };

    let controller = Controller::new(config, OpenFlowHelloCodec);
    controller
        .register_napp("hello_echo", switchyard::hello_napp::HelloEchoNApp::new)
        .expect("registering a napp before start always succeeds");

    let start_result = controller.start().await;
    if let Err(err) = &start_result {
        tracing::error!(%err, "failed to start controller");
        return std::process::ExitCode::from(switchyard::controller::exit_code(&start_result) as u8);
    }
    tracing::info!("switchyard controller is running, press ctrl-c to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for ctrl-c");
    }

    let stop_result = controller.stop().await;
    if let Err(err) = &stop_result {
        tracing::error!(%err, "controller did not stop cleanly");
    }
    std::process::ExitCode::from(switchyard::controller::exit_code(&stop_result) as u8)
}
