//! Messages exchanged between simulated nodes.

use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a simulated node, as assigned by the topology description.
///
/// Backed by an `Arc<str>` so that cloning an id into every message and log
/// line is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The kind of a [`Message`].
///
/// Nodes react to the kinds they know about; any other kind is recorded in
/// the receiver's log and otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Sent once by every node on start to all of its up neighbours.
    Greeting,
    /// Reply to a [`MessageKind::Greeting`], addressed to the greeter only.
    GreetingAck,
    /// Operator-defined kind with no built-in reaction.
    Custom(String),
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Greeting => f.write_str("GREETING"),
            MessageKind::GreetingAck => f.write_str("GREETING_ACK"),
            MessageKind::Custom(name) => f.write_str(name),
        }
    }
}

/// An immutable message travelling between two nodes.
///
/// Ownership moves into the receiver's inbox on send; broadcast sends clone
/// the message once per target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    kind: MessageKind,
    sender: NodeId,
    payload: String,
    emitted_at: DateTime<Utc>,
}

impl Message {
    pub fn new(kind: MessageKind, sender: NodeId, payload: impl Into<String>) -> Self {
        Self {
            kind,
            sender,
            payload: payload.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn greeting(sender: NodeId) -> Self {
        Self::new(MessageKind::Greeting, sender, String::new())
    }

    pub fn greeting_ack(sender: NodeId) -> Self {
        Self::new(MessageKind::GreetingAck, sender, String::new())
    }

    pub fn custom(kind: impl Into<String>, sender: NodeId, payload: impl Into<String>) -> Self {
        Self::new(MessageKind::Custom(kind.into()), sender, payload)
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn sender(&self) -> &NodeId {
        &self.sender
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} at {}",
            self.kind,
            self.sender,
            self.emitted_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        if !self.payload.is_empty() {
            write!(f, " payload={}", self.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_orders_and_compares_by_value() {
        let a = NodeId::new("R1");
        let b = NodeId::from(String::from("R1"));
        assert_eq!(a, b);
        assert!(NodeId::new("R1") < NodeId::new("SW1"));
        assert_eq!(a.to_string(), "R1");
    }

    #[test]
    fn kind_display_matches_log_vocabulary() {
        assert_eq!(MessageKind::Greeting.to_string(), "GREETING");
        assert_eq!(MessageKind::GreetingAck.to_string(), "GREETING_ACK");
        assert_eq!(MessageKind::Custom("PROBE".into()).to_string(), "PROBE");
    }

    #[test]
    fn display_includes_payload_only_when_present() {
        let sender = NodeId::new("SW1");
        let ack = Message::greeting_ack(sender.clone());
        let rendered = ack.to_string();
        assert!(rendered.starts_with("GREETING_ACK from SW1 at "));
        assert!(!rendered.contains("payload="));

        let probe = Message::custom("PROBE", sender, "ttl=3");
        assert!(probe.to_string().ends_with(" payload=ttl=3"));
    }

    #[test]
    fn message_serializes_kind_in_screaming_case() {
        let msg = Message::greeting(NodeId::new("R1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "GREETING");
        assert_eq!(json["sender"], "R1");
    }
}
