//! Data models for BBS
//!
//! Defines the board entities: Topic, Thread, Message and Attachment.
//! Every model serializes to the JSON snapshot carried by sync payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A board category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    /// Unique identifier
    pub id: Uuid,
    /// Globally unique name
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Identity string (`user@source`)
    pub created_by: String,
    pub archived: bool,
}

impl Topic {
    /// Create a new topic
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), name, description, created_by)
    }

    /// Create a topic with a specific ID
    pub fn with_id(
        id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            archived: false,
        }
    }
}

/// A discussion within a topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: Uuid,
    /// Parent topic
    pub topic_id: Uuid,
    pub subject: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Pinned to the top of the topic listing
    pub sticky: bool,
}

impl Thread {
    /// Create a new thread under a topic
    pub fn new(topic_id: Uuid, subject: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic_id,
            subject: subject.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            sticky: false,
        }
    }
}

/// A post within a thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    /// Parent thread
    pub thread_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Set the first time the content is edited
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new message in a thread
    pub fn new(thread_id: Uuid, content: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            content: content.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            edited_at: None,
        }
    }

    /// Replace the content and stamp the edit time
    pub fn edit(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.edited_at = Some(Utc::now());
    }
}

/// A file attached to a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    pub id: Uuid,
    /// Parent message
    pub message_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    /// Create a new attachment on a message
    pub fn new(
        message_id: Uuid,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            filename: filename.into(),
            mime_type: mime_type.into(),
            data,
            created_at: Utc::now(),
        }
    }

    /// Size of the attached data in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Attachment bytes travel as base64 text inside JSON snapshots
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
