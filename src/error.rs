//! Error types for the channel core.
//!
//! Mirrors the error kinds a channel implementation must distinguish:
//! malformed API calls are returned to the caller with the channel left
//! open, while timeouts and transport failures trigger the closing
//! protocol and are surfaced to later callers as [`ChannelError::Closed`].

use std::fmt;

/// Which timeout fired, for [`ChannelError::Timeout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutKind {
    /// A `Send*` call did not complete within `send_timeout`.
    Send,
    /// An intake-buffer enqueue did not complete within `consume_timeout`.
    /// Carries the depth of every per-type ready queue at the moment of
    /// the timeout, so the message is useful for diagnosing which
    /// consumer stalled (spec §4.3 item 1).
    Consume { queue_depths: Vec<(&'static str, usize)> },
    /// `transport.close()` did not complete within `close_timeout`.
    Close,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Send => write!(f, "send"),
            TimeoutKind::Consume { queue_depths } => {
                write!(f, "consume (queue depths:")?;
                for (name, depth) in queue_depths {
                    write!(f, " {name}={depth}")?;
                }
                write!(f, ")")
            }
            TimeoutKind::Close => write!(f, "close"),
        }
    }
}

/// The error type returned by every public operation on [`crate::channel::Channel`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A malformed envelope or argument at the API boundary: missing id
    /// on a command request, wrong status, `observe` where it isn't
    /// allowed, an unparseable [`crate::node::Node`].
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not legal in the channel's current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A command id collided with one already registered in the correlator.
    #[error("duplicate pending command id: {0}")]
    Duplicate(String),

    /// A send, consume, or close timeout elapsed.
    #[error("timeout: {0}")]
    Timeout(TimeoutKind),

    /// The transport reported an I/O or protocol failure.
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// The caller's cancellation token fired before the operation completed.
    #[error("operation canceled")]
    Canceled,

    /// The channel has already entered `finished` or `failed` and rejects
    /// further sends.
    #[error("channel closed")]
    Closed,

    /// A registered module raised an error while processing an envelope.
    #[error("module error: {0}")]
    Module(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
