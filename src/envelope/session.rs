use super::{EnvelopeHeader, Reason};

/// Session state machine states (spec §3).
///
/// ```text
///       new → negotiating → authenticating → established → finishing → finished
///                                                        ↘                    ↗
///                                                         failed ────────────
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    New,
    Negotiating,
    Authenticating,
    Established,
    Finishing,
    Finished,
    Failed,
}

impl SessionState {
    /// `finished` and `failed` are terminal: no envelopes may be sent
    /// after entering them (spec §3).
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionOption {
    None,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionOption {
    None,
    Tls,
}

/// Scheme negotiated for the `authenticating` state. The core only
/// carries this field; it never performs authentication itself — that
/// is a client/server-layer concern built on top of the core (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Plain,
    Key,
    External,
    Transport,
    Guest,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionAuthentication {
    pub scheme: AuthenticationScheme,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionNegotiation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<CompressionOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<EncryptionOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub state: SessionState,
    #[serde(flatten)]
    pub negotiation: SessionNegotiation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<SessionAuthentication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Session {
    pub fn new(state: SessionState) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            state,
            negotiation: SessionNegotiation::default(),
            authentication: None,
            reason: None,
        }
    }

    pub fn failed(reason: Reason) -> Self {
        Self {
            state: SessionState::Failed,
            reason: Some(reason),
            ..Self::new(SessionState::Failed)
        }
    }
}
