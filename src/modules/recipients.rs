//! Fill-envelope-recipients (spec §4.7).
//!
//! On send, fills an absent `from` with the local node and an absent `to`
//! with the remote node; on receive, the symmetric fill. Runs for every
//! envelope kind, since recipients are header fields shared by all four
//! variants.

use async_trait::async_trait;

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::Result;
use crate::module::Module;
use crate::node::Node;

const ALL_KINDS: [EnvelopeKind; 4] = [
    EnvelopeKind::Message,
    EnvelopeKind::Notification,
    EnvelopeKind::Command,
    EnvelopeKind::Session,
];

pub struct RecipientsModule {
    local_node: Node,
    remote_node: Node,
}

impl RecipientsModule {
    pub fn new(local_node: Node, remote_node: Node) -> Self {
        Self {
            local_node,
            remote_node,
        }
    }
}

#[async_trait]
impl Module for RecipientsModule {
    fn kinds(&self) -> &[EnvelopeKind] {
        &ALL_KINDS
    }

    async fn on_send(&self, mut envelope: Envelope) -> Result<Option<Envelope>> {
        let header = envelope.header_mut();
        if header.from.is_none() {
            header.from = Some(self.local_node.clone());
        }
        if header.to.is_none() {
            header.to = Some(self.remote_node.clone());
        }
        Ok(Some(envelope))
    }

    async fn on_receive(&self, mut envelope: Envelope) -> Result<Option<Envelope>> {
        let header = envelope.header_mut();
        if header.from.is_none() {
            header.from = Some(self.remote_node.clone());
        }
        if header.to.is_none() {
            header.to = Some(self.local_node.clone());
        }
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Message;

    fn nodes() -> (Node, Node) {
        (
            Node::new("local", "example.com"),
            Node::new("remote", "example.com"),
        )
    }

    #[tokio::test]
    async fn send_fills_absent_recipients() {
        let (local, remote) = nodes();
        let module = RecipientsModule::new(local.clone(), remote.clone());
        let msg = Envelope::Message(Message::new(serde_json::json!(null)));

        let filled = module.on_send(msg).await.unwrap().unwrap();
        assert_eq!(filled.header().from.as_ref(), Some(&local));
        assert_eq!(filled.header().to.as_ref(), Some(&remote));
    }

    #[tokio::test]
    async fn receive_fills_symmetrically() {
        let (local, remote) = nodes();
        let module = RecipientsModule::new(local.clone(), remote.clone());
        let msg = Envelope::Message(Message::new(serde_json::json!(null)));

        let filled = module.on_receive(msg).await.unwrap().unwrap();
        assert_eq!(filled.header().from.as_ref(), Some(&remote));
        assert_eq!(filled.header().to.as_ref(), Some(&local));
    }

    #[tokio::test]
    async fn present_recipients_are_not_overwritten() {
        let (local, remote) = nodes();
        let module = RecipientsModule::new(local.clone(), remote.clone());
        let mut msg = Envelope::Message(Message::new(serde_json::json!(null)));
        let other = Node::new("someone-else", "example.com");
        msg.header_mut().from = Some(other.clone());

        let filled = module.on_send(msg).await.unwrap().unwrap();
        assert_eq!(filled.header().from.as_ref(), Some(&other));
    }
}
