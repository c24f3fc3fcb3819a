//! A minimal NApp used as both a usage example and the fixture behind the
//! Hello round-trip scenario: it answers every inbound `Hello` with a
//! `Hello` of its own, carrying the peer's xid back.

use crate::error::Result as CoreResult;
use crate::event::MsgEvent;
use crate::frame::OpenFlowMessage;
use crate::napp::{Capabilities, NApp, Registrar};

pub struct HelloEchoNApp {
    caps: Capabilities<OpenFlowMessage>,
}

impl HelloEchoNApp {
    pub fn new(caps: Capabilities<OpenFlowMessage>) -> anyhow::Result<Box<dyn NApp<OpenFlowMessage>>> {
        Ok(Box::new(Self { caps }))
    }
}

impl NApp<OpenFlowMessage> for HelloEchoNApp {
    fn name(&self) -> &str {
        "hello_echo"
    }

    fn register(&self, registrar: &mut Registrar<'_, OpenFlowMessage>) {
        let msg_out = self.caps.msg_out.clone();
        registrar
            .on_msg_in("Hello", move |event: &MsgEvent<OpenFlowMessage>| {
                let OpenFlowMessage::Hello { xid } = &event.message else {
                    return Ok(());
                };
                let reply = MsgEvent {
                    connection: event.connection,
                    timestamp: event.timestamp,
                    message: OpenFlowMessage::Hello { xid: *xid },
                };
                let msg_out = msg_out.clone();
                tokio::spawn(async move {
                    let _: CoreResult<()> = msg_out.put(reply).await;
                });
                Ok(())
            })
            .expect("literal pattern is a valid regex");
    }

    fn shutdown(&mut self) {
        tracing::debug!("hello_echo napp shutting down");
    }
}
