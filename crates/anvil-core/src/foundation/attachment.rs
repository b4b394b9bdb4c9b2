//! Attachments carried by messages.
//!
//! An [`Attachment`] is either **received** (it has an `id` and the backend's
//! raw description, its bytes can be fetched lazily through the backend) or
//! **pending** (it carries `content` that still has to be uploaded when the
//! message is sent).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of an attachment, used as the routing key of attachment routers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    Video,
    Audio,
    Voice,
    Sticker,
    Location,
    /// A platform-specific kind not covered above.
    Other(String),
}

impl AttachmentKind {
    /// Returns the lowercase name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Other(name) => name,
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "image" | "photo" => Self::Image,
            "document" | "doc" | "file" => Self::Document,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "voice" | "audio_message" => Self::Voice,
            "sticker" => Self::Sticker,
            "location" | "geo" => Self::Location,
            other => Self::Other(other.to_string()),
        })
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Backend-assigned identifier; `None` for pending attachments.
    pub id: Option<String>,
    pub kind: AttachmentKind,
    pub title: Option<String>,
    pub file_name: Option<String>,
    /// Bytes waiting to be uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<u8>>,
    /// The backend's own description of a received attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Attachment {
    /// Creates a pending attachment that will be uploaded on send.
    pub fn new(kind: AttachmentKind, content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            kind,
            title: None,
            file_name: None,
            content: Some(content.into()),
            raw: None,
        }
    }

    /// Creates an attachment that already exists on the platform.
    pub fn existing(id: impl Into<String>, kind: AttachmentKind) -> Self {
        Self {
            id: Some(id.into()),
            kind,
            title: None,
            file_name: None,
            content: None,
            raw: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Returns `true` if the attachment still has to be uploaded.
    pub fn is_pending(&self) -> bool {
        self.content.is_some()
    }
}
