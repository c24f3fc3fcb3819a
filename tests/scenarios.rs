//! End-to-end scenarios driven against a real bound controller over real
//! `TcpStream`s (the Hello round trip, duplicate-dpid rejection, reconnect,
//! and graceful drain scenarios). The oversize-frame scenario is covered at
//! the unit level in `src/frame.rs`, and NApp-crash isolation in
//! `src/listener.rs`, both of which need no live socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use switchyard::frame::{encode_frame, FrameHeader, HEADER_SIZE, OFPT_HELLO};
use switchyard::hello_napp::HelloEchoNApp;
use switchyard::napp::{Capabilities, NApp, Registrar};
use switchyard::{Config, Controller, OpenFlowHelloCodec, OpenFlowMessage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Records the type name of every app event it observes, in arrival order.
/// Used to assert the SwitchUp/SwitchDown lifecycle ordering a NApp would
/// rely on, rather than just the functional Hello round trip.
struct LifecycleRecorder {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl LifecycleRecorder {
    fn new(seen: Arc<Mutex<Vec<&'static str>>>) -> impl Fn(Capabilities<OpenFlowMessage>) -> anyhow::Result<Box<dyn NApp<OpenFlowMessage>>> {
        move |_caps| Ok(Box::new(Self { seen: seen.clone() }) as Box<dyn NApp<OpenFlowMessage>>)
    }
}

impl NApp<OpenFlowMessage> for LifecycleRecorder {
    fn name(&self) -> &str {
        "lifecycle_recorder"
    }

    fn register(&self, registrar: &mut Registrar<'_, OpenFlowMessage>) {
        let seen = self.seen.clone();
        registrar
            .on_app(".*", move |env| {
                seen.lock().unwrap().push(env.payload.type_name());
                Ok(())
            })
            .expect("literal pattern is a valid regex");
    }

    fn shutdown(&mut self) {}
}

async fn start_test_controller() -> Controller<OpenFlowHelloCodec> {
    let mut config = Config::default();
    config.listen = "127.0.0.1".parse().unwrap();
    config.port = 0;
    config.shutdown_grace_seconds = 2;

    let controller = Controller::new(config, OpenFlowHelloCodec);
    controller
        .register_napp("hello_echo", HelloEchoNApp::new)
        .unwrap();
    controller.start().await.unwrap();
    controller
}

async fn send_hello(stream: &mut TcpStream, xid: u32) {
    let bytes = encode_frame(
        &FrameHeader {
            version: 4,
            msg_type: OFPT_HELLO,
            length: HEADER_SIZE as u16,
            xid,
        },
        &[],
    );
    stream.write_all(&bytes).await.unwrap();
}

/// Waits briefly for a Hello reply; `None` covers both a closed connection
/// and a reply that never arrives within the window.
async fn try_recv_hello(stream: &mut TcpStream) -> Option<u32> {
    let mut buf = [0u8; HEADER_SIZE];
    match tokio::time::timeout(Duration::from_millis(500), stream.read_exact(&mut buf)).await {
        Ok(Ok(_)) => Some(FrameHeader::parse(&buf).xid),
        _ => None,
    }
}

#[tokio::test]
async fn s1_hello_round_trip() {
    let controller = start_test_controller().await;
    let addr = controller.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut stream, 0x1234).await;
    assert_eq!(try_recv_hello(&mut stream).await, Some(0x1234));

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn s2_reconnect_after_disconnect_is_accepted() {
    let controller = start_test_controller().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    controller
        .register_napp("lifecycle_recorder", LifecycleRecorder::new(seen.clone()))
        .unwrap();
    let addr = controller.local_addr().unwrap();

    {
        let mut first = TcpStream::connect(addr).await.unwrap();
        send_hello(&mut first, 7).await;
        assert_eq!(try_recv_hello(&mut first).await, Some(7));
    } // dropped: closes the socket, the reader observes EOF

    // give the server a moment to process ConnectionLost/SwitchDown
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut second, 7).await;
    assert_eq!(try_recv_hello(&mut second).await, Some(7));

    // give the server a moment to process the second NewConnection/SwitchUp
    tokio::time::sleep(Duration::from_millis(200)).await;

    controller.stop().await.unwrap();

    let lifecycle: Vec<&'static str> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|name| matches!(*name, &"SwitchUp" | &"SwitchDown"))
        .copied()
        .collect();
    assert_eq!(lifecycle, vec!["SwitchUp", "SwitchDown", "SwitchUp"]);
}

#[tokio::test]
async fn s3_duplicate_dpid_is_rejected() {
    let controller = start_test_controller().await;
    let addr = controller.local_addr().unwrap();

    let mut first = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut first, 42).await;
    assert_eq!(try_recv_hello(&mut first).await, Some(42));

    let mut second = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut second, 42).await;
    assert_eq!(try_recv_hello(&mut second).await, None);

    // the first connection is unaffected by the rejected duplicate
    send_hello(&mut first, 42).await;
    assert_eq!(try_recv_hello(&mut first).await, Some(42));

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn s5_graceful_stop_drains_within_grace_period() {
    let controller = start_test_controller().await;
    let addr = controller.local_addr().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut stream, 1).await;
    assert_eq!(try_recv_hello(&mut stream).await, Some(1));

    controller.stop().await.unwrap();

    // the controller is no longer running: a second stop is invalid
    assert!(matches!(
        controller.stop().await,
        Err(switchyard::Error::InvalidState)
    ));
}
