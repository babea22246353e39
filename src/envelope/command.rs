use super::{Document, EnvelopeHeader, Reason};
use crate::error::ChannelError;

/// The operation a command requests (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    /// Broadcast-style notification, exempt from request/response
    /// correlation in both directions (spec §4.2 "Observe semantics").
    Observe,
    Merge,
}

impl CommandMethod {
    pub fn is_observe(&self) -> bool {
        matches!(self, CommandMethod::Observe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub method: CommandMethod,
    pub uri: String,
    pub status: CommandStatus,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Command {
    /// A new pending request for `method`/`uri`, with a generated
    /// correlation id (the caller may overwrite it with [`Command::with_id`]).
    pub fn request(method: CommandMethod, uri: impl Into<String>) -> Self {
        Self {
            header: EnvelopeHeader {
                id: Some(uuid::Uuid::new_v4().to_string()),
                ..Default::default()
            },
            method,
            uri: uri.into(),
            status: CommandStatus::Pending,
            media_type: None,
            resource: None,
            reason: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.header.id = Some(id.into());
        self
    }

    /// Build a success response reusing `self`'s id, as `trySubmitCommandResult`
    /// expects (spec §4.2).
    pub fn success_response(&self, resource: Option<Document>) -> Self {
        Self {
            header: EnvelopeHeader {
                id: self.header.id.clone(),
                ..Default::default()
            },
            method: self.method,
            uri: self.uri.clone(),
            status: CommandStatus::Success,
            media_type: None,
            resource,
            reason: None,
        }
    }

    pub fn failure_response(&self, reason: Reason) -> Self {
        Self {
            header: EnvelopeHeader {
                id: self.header.id.clone(),
                ..Default::default()
            },
            method: self.method,
            uri: self.uri.clone(),
            status: CommandStatus::Failure,
            media_type: None,
            resource: None,
            reason: Some(reason),
        }
    }

    pub fn is_request(&self) -> bool {
        self.status == CommandStatus::Pending
    }

    pub fn is_response(&self) -> bool {
        self.status != CommandStatus::Pending
    }

    /// Validates the preconditions `processCommand` imposes on a request
    /// (spec §4.2): `status = pending`, `method != observe`, non-empty id.
    pub fn validate_as_request(&self) -> Result<(), ChannelError> {
        if self.status != CommandStatus::Pending {
            return Err(ChannelError::InvalidArgument(
                "command request must have status = pending".into(),
            ));
        }
        if self.method.is_observe() {
            return Err(ChannelError::InvalidArgument(
                "observe commands are not eligible for request/response correlation".into(),
            ));
        }
        match &self.header.id {
            Some(id) if !id.is_empty() => Ok(()),
            _ => Err(ChannelError::InvalidArgument(
                "command request must have a non-empty id".into(),
            )),
        }
    }

    /// Validates the preconditions `trySubmitCommandResult` imposes on an
    /// inbound response (spec §4.2).
    pub fn validate_as_response(&self) -> Result<(), ChannelError> {
        match &self.header.id {
            Some(id) if !id.is_empty() => {}
            _ => {
                return Err(ChannelError::InvalidArgument(
                    "command response must have a non-empty id".into(),
                ))
            }
        }
        if self.status == CommandStatus::Pending {
            return Err(ChannelError::InvalidArgument(
                "command response must not have status = pending".into(),
            ));
        }
        if self.method.is_observe() {
            return Err(ChannelError::InvalidArgument(
                "observe commands are not eligible for request/response correlation".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_validates() {
        let cmd = Command::request(CommandMethod::Get, "/ping");
        assert!(cmd.validate_as_request().is_ok());
    }

    #[test]
    fn observe_request_rejected() {
        let cmd = Command::request(CommandMethod::Observe, "/presence");
        assert!(cmd.validate_as_request().is_err());
    }

    #[test]
    fn response_reuses_request_id() {
        let request = Command::request(CommandMethod::Get, "/account");
        let response = request.success_response(None);
        assert_eq!(request.header.id, response.header.id);
        assert!(response.validate_as_response().is_ok());
    }

    #[test]
    fn pending_response_rejected() {
        let request = Command::request(CommandMethod::Get, "/account");
        assert!(request.validate_as_response().is_err());
    }
}
