use super::{EnvelopeHeader, Reason};

/// Lifecycle event reported for a previously sent envelope (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEvent {
    Failed,
    Accepted,
    /// Deprecated by the protocol, retained for wire compatibility.
    Validated,
    /// Deprecated by the protocol, retained for wire compatibility.
    Authorized,
    Dispatched,
    Received,
    Consumed,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub event: NotificationEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    pub fn new(event: NotificationEvent) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            event,
            reason: None,
        }
    }

    pub fn failed(reason: Reason) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            event: NotificationEvent::Failed,
            reason: Some(reason),
        }
    }
}
