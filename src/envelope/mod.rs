//! The envelope sum type and its four concrete variants (spec §3).
//!
//! Deep class hierarchies with polymorphic serialization (the original
//! LIME model) are replaced here with a tagged union of four variants
//! plus an opaque [`Document`] type for content/resource bodies — the
//! document-type registry is out of scope for this core (spec §1).

mod command;
mod message;
mod notification;
mod session;

pub use command::{Command, CommandMethod, CommandStatus};
pub use message::Message;
pub use notification::{Notification, NotificationEvent};
pub use session::{
    AuthenticationScheme, CompressionOption, EncryptionOption, Session, SessionAuthentication,
    SessionNegotiation, SessionState,
};

use std::collections::HashMap;

use crate::node::Node;

/// Content/resource bodies are opaque to the channel core; it only
/// carries them. A real deployment plugs in a document-type registry
/// above this core (spec §1, §6).
pub type Document = serde_json::Value;

/// `code` + human-readable `description`, attached to failed
/// notifications, failed/session-failed envelopes, and command failures.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reason {
    pub code: i32,
    pub description: Option<String>,
}

impl Reason {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }
}

/// Fields shared by every envelope variant (spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EnvelopeHeader {
    /// Correlation id. Optional on messages and notifications, required
    /// on request commands (status = pending).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    /// Via-node ("ponto de passagem"): the intermediate relay, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Discriminant used for demultiplexing (spec §4.3) and module-chain
/// selection, without matching on the full [`Envelope`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Command,
    Session,
}

impl EnvelopeKind {
    /// Stable name used in diagnostics (e.g. consume-timeout queue depths).
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Notification => "notification",
            EnvelopeKind::Command => "command",
            EnvelopeKind::Session => "session",
        }
    }
}

/// The top-level protocol unit: message, notification, command, or session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    Command(Command),
    Session(Session),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Message(_) => EnvelopeKind::Message,
            Envelope::Notification(_) => EnvelopeKind::Notification,
            Envelope::Command(_) => EnvelopeKind::Command,
            Envelope::Session(_) => EnvelopeKind::Session,
        }
    }

    pub fn header(&self) -> &EnvelopeHeader {
        match self {
            Envelope::Message(m) => &m.header,
            Envelope::Notification(n) => &n.header,
            Envelope::Command(c) => &c.header,
            Envelope::Session(s) => &s.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EnvelopeHeader {
        match self {
            Envelope::Message(m) => &mut m.header,
            Envelope::Notification(n) => &mut n.header,
            Envelope::Command(c) => &mut c.header,
            Envelope::Session(s) => &mut s.header,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Envelope::Command(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_session(&self) -> Option<&Session> {
        match self {
            Envelope::Session(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Message> for Envelope {
    fn from(m: Message) -> Self {
        Envelope::Message(m)
    }
}

impl From<Notification> for Envelope {
    fn from(n: Notification) -> Self {
        Envelope::Notification(n)
    }
}

impl From<Command> for Envelope {
    fn from(c: Command) -> Self {
        Envelope::Command(c)
    }
}

impl From<Session> for Envelope {
    fn from(s: Session) -> Self {
        Envelope::Session(s)
    }
}
