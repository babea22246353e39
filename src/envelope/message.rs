use super::{Document, EnvelopeHeader};

/// A message envelope: carries application content with no terminal
/// semantics (spec §3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    /// Media type of `content` (e.g. `text/plain`, `application/json`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub content: Document,
}

impl Message {
    pub fn new(content: Document) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            media_type: None,
            content,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.header.id = Some(id.into());
        self
    }
}
