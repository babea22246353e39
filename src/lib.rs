//! # lime-channel-core
//!
//! The channel core of a LIME-style messaging protocol runtime: framing
//! and demultiplexing message/notification/command/session envelopes over
//! a single duplex transport, a session state machine gating which
//! envelopes are legal to send or receive, and command request/response
//! correlation.
//!
//! Transport implementations, envelope JSON serialization, and the
//! higher-level client/server workflow built on top of this core are out
//! of scope — this crate only consumes the [`transport::Transport`]
//! contract and exposes the channel's public operations.

pub mod channel;
pub mod correlator;
pub mod envelope;
pub mod error;
pub mod module;
pub mod modules;
pub mod node;
pub mod receiver;
pub mod sender;
pub mod session_state;
pub mod transport;

pub use channel::{Channel, ChannelBuilder, ChannelEvent, EventHandler};
pub use correlator::Correlator;
pub use envelope::{
    Command, CommandMethod, CommandStatus, Envelope, EnvelopeHeader, EnvelopeKind, Message,
    Notification, NotificationEvent, Reason, Session, SessionState,
};
pub use error::{ChannelError, Result, TimeoutKind};
pub use module::{Module, ModuleChain};
pub use node::Node;
pub use transport::Transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
