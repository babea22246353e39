//! Auto-reply-ping (spec §4.7).
//!
//! On receipt of a pending `get /ping` command, synthesizes a success
//! response and hands it to the sender directly, bypassing the normal
//! `Send*` state check — this module only ever runs once the channel is
//! established, so the check would always pass anyway.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::{Command, CommandMethod, CommandStatus, Envelope, EnvelopeKind};
use crate::error::Result;
use crate::module::Module;

const PING_URI: &str = "/ping";

/// What a ping reply is handed to once synthesized. Implemented by
/// [`crate::sender::Sender`]; kept as a trait so this module does not
/// depend on the sender's full surface.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn enqueue(&self, envelope: Envelope) -> Result<()>;
}

pub struct PingModule {
    sink: Arc<dyn OutboundSink>,
}

impl PingModule {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self { sink }
    }

    fn is_ping_request(command: &Command) -> bool {
        command.status == CommandStatus::Pending
            && command.method == CommandMethod::Get
            && command.uri == PING_URI
    }
}

#[async_trait]
impl Module for PingModule {
    fn kinds(&self) -> &[EnvelopeKind] {
        &[EnvelopeKind::Command]
    }

    async fn on_receive(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        let Envelope::Command(command) = &envelope else {
            return Ok(Some(envelope));
        };
        if !Self::is_ping_request(command) {
            return Ok(Some(envelope));
        }

        let response = command.success_response(Some(serde_json::json!({ "ping": true })));
        debug!(id = ?response.header.id, "replying to ping");
        self.sink.enqueue(Envelope::Command(response)).await?;
        Ok(None) // dropped from the application stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn enqueue(&self, envelope: Envelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    #[tokio::test]
    async fn replies_to_ping_and_drops_original() {
        let sink = Arc::new(RecordingSink::default());
        let module = PingModule::new(sink.clone());
        let request = Envelope::Command(
            Command::request(CommandMethod::Get, "/ping").with_id("p1"),
        );

        let result = module.on_receive(request).await.unwrap();
        assert!(result.is_none());

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let Envelope::Command(reply) = &sent[0] else {
            panic!("expected a command reply");
        };
        assert_eq!(reply.header.id.as_deref(), Some("p1"));
        assert_eq!(reply.status, CommandStatus::Success);
    }

    #[tokio::test]
    async fn non_ping_commands_pass_through() {
        let sink = Arc::new(RecordingSink::default());
        let module = PingModule::new(sink.clone());
        let request = Envelope::Command(Command::request(CommandMethod::Get, "/account"));

        let result = module.on_receive(request.clone()).await.unwrap();
        assert_eq!(result, Some(request));
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
