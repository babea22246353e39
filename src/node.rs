//! Routable protocol identity: `name@domain/instance`.

use std::fmt;
use std::str::FromStr;

use crate::error::ChannelError;

/// A node address of the form `name@domain/instance`, with `instance`
/// optional. Used for the `from`/`to`/`pp` fields on every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Node {
    pub name: String,
    pub domain: String,
    pub instance: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            instance: None,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// The `name@domain` part, without the instance suffix.
    pub fn to_identity(&self) -> String {
        format!("{}@{}", self.name, self.domain)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)?;
        if let Some(instance) = &self.instance {
            write!(f, "/{instance}")?;
        }
        Ok(())
    }
}

impl FromStr for Node {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identity, instance) = match s.split_once('/') {
            Some((identity, instance)) => (identity, Some(instance.to_string())),
            None => (s, None),
        };
        let (name, domain) = identity.split_once('@').ok_or_else(|| {
            ChannelError::InvalidArgument(format!("node '{s}' is missing '@domain'"))
        })?;
        if name.is_empty() || domain.is_empty() {
            return Err(ChannelError::InvalidArgument(format!(
                "node '{s}' has an empty name or domain"
            )));
        }
        Ok(Node {
            name: name.to_string(),
            domain: domain.to_string(),
            instance,
        })
    }
}

impl TryFrom<String> for Node {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Node> for String {
    fn from(node: Node) -> Self {
        node.to_string()
    }
}
