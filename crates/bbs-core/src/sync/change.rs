//! Change types
//!
//! A `Change` is one local mutation waiting in the outbox. Once pushed, the
//! server assigns it a sequence number and other devices receive it as a
//! `RemoteChange`.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entity a Change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Topic,
    Thread,
    Message,
    Attachment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Topic => "topic",
            EntityKind::Thread => "thread",
            EntityKind::Message => "message",
            EntityKind::Attachment => "attachment",
        }
    }

    /// Parse a wire name. Unknown kinds yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic" => Some(EntityKind::Topic),
            "thread" => Some(EntityKind::Thread),
            "message" => Some(EntityKind::Message),
            "attachment" => Some(EntityKind::Attachment),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Upsert,
    Delete,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Upsert => "upsert",
            Op::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(Op::Upsert),
            "delete" => Some(Op::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A queued local mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Time-sortable unique id (UUIDv7)
    pub id: String,
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub op: Op,
    /// JSON snapshot of the entity after the mutation; `None` for deletes
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Change {
    /// Build an upsert carrying a full snapshot of `entity`
    pub fn upsert<T: Serialize>(
        kind: EntityKind,
        entity_id: Uuid,
        entity: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            entity: kind,
            entity_id,
            op: Op::Upsert,
            payload: Some(serde_json::to_string(entity)?),
            created_at: Utc::now(),
        })
    }

    /// Build a delete carrying only the id
    pub fn delete(kind: EntityKind, entity_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            entity: kind,
            entity_id,
            op: Op::Delete,
            payload: None,
            created_at: Utc::now(),
        }
    }

    /// View this local Change as if it had come back from the server
    ///
    /// Used to replay queued Changes into another store.
    pub fn to_remote(&self, sequence: i64) -> RemoteChange {
        RemoteChange {
            sequence,
            entity: self.entity.as_str().to_string(),
            entity_id: self.entity_id.to_string(),
            op: self.op.as_str().to_string(),
            payload: self
                .payload
                .as_ref()
                .map(|p| p.as_bytes().to_vec())
                .unwrap_or_default(),
            decode_error: None,
        }
    }
}

/// A Change as received from the remote log
///
/// Fields are kept as raw strings so unknown kinds from newer clients can be
/// recognised and skipped instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    /// Server-assigned, strictly increasing
    pub sequence: i64,
    pub entity: String,
    pub entity_id: String,
    pub op: String,
    /// Payload bytes (sealed on the wire, plaintext JSON once opened)
    pub payload: Vec<u8>,
    /// Set when the wire payload could not be decoded; the Change is skipped
    pub decode_error: Option<String>,
}

impl RemoteChange {
    /// Build from the wire form, where the payload is base64 text
    ///
    /// A payload that is not valid base64 does not fail the page it arrived
    /// in. It is recorded in `decode_error` so only this Change is skipped.
    pub fn from_wire(
        sequence: i64,
        entity: String,
        entity_id: String,
        op: String,
        payload: Option<&str>,
    ) -> Self {
        let (payload, decode_error) = match payload {
            None | Some("") => (Vec::new(), None),
            Some(encoded) => match BASE64.decode(encoded) {
                Ok(bytes) => (bytes, None),
                Err(e) => (Vec::new(), Some(format!("payload is not base64: {}", e))),
            },
        };
        Self {
            sequence,
            entity,
            entity_id,
            op,
            payload,
            decode_error,
        }
    }

    /// Same Change with a replaced payload
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..self.clone()
        }
    }
}

/// Result of queueing a Change after a local mutation
///
/// Never an error: the mutation itself has already succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Stored in the outbox under this change id
    Queued(String),
    /// Sync is not configured on this device
    Skipped,
    /// The outbox write failed
    Failed(String),
}

impl EnqueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, EnqueueOutcome::Queued(_))
    }
}

/// A Change ready for upload, payload already sealed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChange {
    pub change_id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub op: Op,
    pub payload: Vec<u8>,
}
