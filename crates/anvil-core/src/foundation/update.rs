//! Inbound updates.
//!
//! Backends translate whatever their platform delivers into an [`Update`]:
//! either a [`Message`] (text and attachments from a user) or a raw platform
//! event that only plugins aware of that platform can interpret. Updates are
//! never modified after the backend hands them over.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::attachment::{Attachment, AttachmentKind};

/// Whether a message was sent in a one-to-one chat or a multi-user chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Private,
    Group,
}

/// High-level classification of an [`Update`], mostly for logging and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Message,
    Raw,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => f.write_str("message"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

/// A message received by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: String,
    /// The chat the message was sent to. Replies go here.
    pub recipient_id: String,
    pub recipient_kind: RecipientKind,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub date: i64,
    /// The platform's original representation.
    #[serde(default)]
    pub raw: Value,
}

impl Message {
    /// Creates a private message; replies go back to the sender.
    pub fn private(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        let sender_id = sender_id.into();
        Self {
            recipient_id: sender_id.clone(),
            sender_id,
            recipient_kind: RecipientKind::Private,
            text: text.into(),
            attachments: Vec::new(),
            date: 0,
            raw: Value::Null,
        }
    }

    /// Creates a message posted in a group chat.
    pub fn group(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            recipient_id: recipient_id.into(),
            recipient_kind: RecipientKind::Group,
            text: text.into(),
            attachments: Vec::new(),
            date: 0,
            raw: Value::Null,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_date(mut self, date: i64) -> Self {
        self.date = date;
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    /// Returns `true` for messages from multi-user chats.
    pub fn is_group(&self) -> bool {
        self.recipient_kind == RecipientKind::Group
    }

    /// Kinds of all attachments, in attachment order.
    pub fn attachment_kinds(&self) -> impl Iterator<Item = &AttachmentKind> {
        self.attachments.iter().map(|a| &a.kind)
    }

    /// Returns the structured payload attached to the message, if any.
    ///
    /// Looks at `raw["payload"]`. Platforms that deliver the payload as a
    /// JSON-encoded string are supported: the string is parsed, and kept as a
    /// plain string when it is not valid JSON.
    pub fn payload(&self) -> Option<Value> {
        match self.raw.get("payload")? {
            Value::Null => None,
            Value::String(s) => {
                Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())))
            }
            other => Some(other.clone()),
        }
    }
}

/// An inbound event produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Update {
    Message(Message),
    /// Any platform event that is not a message.
    Raw(Value),
}

impl Update {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Self::Message(_) => UpdateKind::Message,
            Self::Raw(_) => UpdateKind::Raw,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message(_))
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Raw(_) => None,
        }
    }

    /// The platform's original representation of this update.
    pub fn raw(&self) -> &Value {
        match self {
            Self::Message(message) => &message.raw,
            Self::Raw(raw) => raw,
        }
    }
}

impl From<Message> for Update {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn private_message_replies_to_sender() {
        let msg = Message::private("42", "hi");
        assert_eq!(msg.recipient_id, "42");
        assert!(!msg.is_group());
    }

    #[test]
    fn payload_accepts_encoded_json() {
        let msg = Message::private("1", "").with_raw(json!({ "payload": "{\"cmd\":\"buy\"}" }));
        assert_eq!(msg.payload(), Some(json!({ "cmd": "buy" })));

        let msg = Message::private("1", "").with_raw(json!({ "payload": { "cmd": "sell" } }));
        assert_eq!(msg.payload(), Some(json!({ "cmd": "sell" })));

        let msg = Message::private("1", "").with_raw(json!({ "payload": "plain" }));
        assert_eq!(msg.payload(), Some(json!("plain")));

        assert_eq!(Message::private("1", "").payload(), None);
    }

    #[test]
    fn update_classification() {
        let update = Update::from(Message::group("1", "2", "x"));
        assert_eq!(update.kind(), UpdateKind::Message);
        assert!(update.as_message().is_some());

        let update = Update::Raw(json!({ "type": "typing" }));
        assert_eq!(update.kind(), UpdateKind::Raw);
        assert_eq!(update.raw()["type"], "typing");
    }
}
