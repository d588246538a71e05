//! Apply remote Changes to the local store
//!
//! Every Change is an upsert or delete keyed by entity id. Upserts insert
//! missing rows and otherwise overwrite only the mutable columns, so applying
//! the same Change twice leaves the store as applying it once. Deletes rely on
//! the schema's cascading foreign keys.

use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use super::change::{EntityKind, Op, RemoteChange};
use crate::models::{Attachment, Message, Thread, Topic};

/// What happened to a single Change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Entity kind this version does not know about
    Ignored,
}

#[derive(Error, Debug)]
pub enum ApplyError {
    /// The Change itself is unusable; skip it and carry on
    #[error("{0}")]
    Integrity(String),

    /// The local database failed; stop the round
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Apply one opened (plaintext) remote Change
pub fn apply_change(conn: &Connection, change: &RemoteChange) -> Result<ApplyOutcome, ApplyError> {
    let Some(kind) = EntityKind::parse(&change.entity) else {
        tracing::debug!(
            seq = change.sequence,
            entity = %change.entity,
            "Ignoring change for unknown entity kind"
        );
        return Ok(ApplyOutcome::Ignored);
    };

    let op = Op::parse(&change.op)
        .ok_or_else(|| ApplyError::Integrity(format!("unknown op '{}'", change.op)))?;
    let entity_id = Uuid::parse_str(&change.entity_id).map_err(|e| {
        ApplyError::Integrity(format!("invalid entity id '{}': {}", change.entity_id, e))
    })?;

    let result = match op {
        Op::Delete => delete_entity(conn, kind, entity_id),
        Op::Upsert => match kind {
            EntityKind::Topic => upsert_topic(conn, &decode(change, entity_id)?),
            EntityKind::Thread => upsert_thread(conn, &decode(change, entity_id)?),
            EntityKind::Message => upsert_message(conn, &decode(change, entity_id)?),
            EntityKind::Attachment => upsert_attachment(conn, &decode(change, entity_id)?),
        },
    };

    match result {
        Ok(()) => {
            tracing::debug!(seq = change.sequence, %kind, %op, id = %entity_id, "Applied change");
            Ok(ApplyOutcome::Applied)
        }
        Err(e) if is_foreign_key_constraint(&e) => Err(ApplyError::Integrity(format!(
            "{} {} references a missing parent",
            kind, entity_id
        ))),
        Err(e) if is_unique_constraint(&e) => Err(ApplyError::Integrity(format!(
            "{} {} collides with an existing name",
            kind, entity_id
        ))),
        Err(e) => Err(ApplyError::Storage(e)),
    }
}

/// Snapshot payloads carry their own id, which must match the Change
trait Snapshot: DeserializeOwned {
    fn id(&self) -> Uuid;
}

impl Snapshot for Topic {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Snapshot for Thread {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Snapshot for Message {
    fn id(&self) -> Uuid {
        self.id
    }
}

impl Snapshot for Attachment {
    fn id(&self) -> Uuid {
        self.id
    }
}

fn decode<T: Snapshot>(change: &RemoteChange, entity_id: Uuid) -> Result<T, ApplyError> {
    if change.payload.is_empty() {
        return Err(ApplyError::Integrity(format!(
            "upsert for {} {} has no payload",
            change.entity, entity_id
        )));
    }

    let snapshot: T = serde_json::from_slice(&change.payload).map_err(|e| {
        ApplyError::Integrity(format!(
            "malformed {} payload for {}: {}",
            change.entity, entity_id, e
        ))
    })?;

    if snapshot.id() != entity_id {
        return Err(ApplyError::Integrity(format!(
            "payload id {} does not match entity id {}",
            snapshot.id(),
            entity_id
        )));
    }
    Ok(snapshot)
}

fn delete_entity(conn: &Connection, kind: EntityKind, id: Uuid) -> rusqlite::Result<()> {
    let table = match kind {
        EntityKind::Topic => "topics",
        EntityKind::Thread => "threads",
        EntityKind::Message => "messages",
        EntityKind::Attachment => "attachments",
    };
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", table),
        params![id.to_string()],
    )?;
    Ok(())
}

pub(crate) fn upsert_topic(conn: &Connection, topic: &Topic) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO topics (id, name, description, created_at, created_by, archived)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            archived = excluded.archived
        "#,
        params![
            topic.id.to_string(),
            topic.name,
            topic.description,
            topic.created_at.timestamp_millis(),
            topic.created_by,
            topic.archived,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_thread(conn: &Connection, thread: &Thread) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO threads (id, topic_id, subject, created_at, created_by, sticky)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            subject = excluded.subject,
            sticky = excluded.sticky
        "#,
        params![
            thread.id.to_string(),
            thread.topic_id.to_string(),
            thread.subject,
            thread.created_at.timestamp_millis(),
            thread.created_by,
            thread.sticky,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_message(conn: &Connection, message: &Message) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO messages (id, thread_id, content, created_at, created_by, edited_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            edited_at = excluded.edited_at
        "#,
        params![
            message.id.to_string(),
            message.thread_id.to_string(),
            message.content,
            message.created_at.timestamp_millis(),
            message.created_by,
            message.edited_at.map(|t| t.timestamp_millis()),
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_attachment(conn: &Connection, attachment: &Attachment) -> rusqlite::Result<()> {
    conn.execute(
        r#"
        INSERT INTO attachments (id, message_id, filename, mime_type, data, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            filename = excluded.filename,
            mime_type = excluded.mime_type
        "#,
        params![
            attachment.id.to_string(),
            attachment.message_id.to_string(),
            attachment.filename,
            attachment.mime_type,
            attachment.data,
            attachment.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn is_foreign_key_constraint(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        }
        _ => false,
    }
}

fn is_unique_constraint(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_schema;
    use crate::sync::change::Change;
    use chrono::{DateTime, Utc};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn upsert<T: serde::Serialize>(kind: EntityKind, id: Uuid, entity: &T, seq: i64) -> RemoteChange {
        Change::upsert(kind, id, entity).unwrap().to_remote(seq)
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .unwrap()
    }

    fn expect_integrity(result: Result<ApplyOutcome, ApplyError>) -> String {
        match result {
            Err(ApplyError::Integrity(reason)) => reason,
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    /// Topic, thread, message and attachment applied in order
    fn seed(conn: &Connection) -> (Topic, Thread, Message, Attachment) {
        let topic = Topic::new("general", "General chat", "alice@cli");
        let thread = Thread::new(topic.id, "Hello", "alice@cli");
        let message = Message::new(thread.id, "hi", "alice@cli");
        let attachment = Attachment::new(message.id, "a.txt", "text/plain", b"abc".to_vec());

        apply_change(conn, &upsert(EntityKind::Topic, topic.id, &topic, 1)).unwrap();
        apply_change(conn, &upsert(EntityKind::Thread, thread.id, &thread, 2)).unwrap();
        apply_change(conn, &upsert(EntityKind::Message, message.id, &message, 3)).unwrap();
        apply_change(conn, &upsert(EntityKind::Attachment, attachment.id, &attachment, 4)).unwrap();
        (topic, thread, message, attachment)
    }

    #[test]
    fn test_apply_twice_equals_once() {
        let conn = test_conn();
        let topic = Topic::new("general", "General chat", "alice@cli");
        let change = upsert(EntityKind::Topic, topic.id, &topic, 1);

        assert_eq!(apply_change(&conn, &change).unwrap(), ApplyOutcome::Applied);
        assert_eq!(apply_change(&conn, &change).unwrap(), ApplyOutcome::Applied);
        assert_eq!(count(&conn, "topics"), 1);
    }

    #[test]
    fn test_upsert_overwrites_mutable_fields_only() {
        let conn = test_conn();
        let mut topic = Topic::new("general", "General chat", "alice@cli");
        apply_change(&conn, &upsert(EntityKind::Topic, topic.id, &topic, 1)).unwrap();

        topic.name = "lobby".to_string();
        topic.description = "Renamed".to_string();
        topic.archived = true;
        topic.created_by = "mallory@cli".to_string();
        apply_change(&conn, &upsert(EntityKind::Topic, topic.id, &topic, 2)).unwrap();

        let (name, description, archived, created_by): (String, String, bool, String) = conn
            .query_row(
                "SELECT name, description, archived, created_by FROM topics WHERE id = ?1",
                params![topic.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(name, "lobby");
        assert_eq!(description, "Renamed");
        assert!(archived);
        assert_eq!(created_by, "alice@cli");
    }

    #[test]
    fn test_message_edit_applies_edited_at() {
        let conn = test_conn();
        let (_, _, mut message, _) = seed(&conn);

        message.edit("hello there");
        apply_change(&conn, &upsert(EntityKind::Message, message.id, &message, 5)).unwrap();

        let (content, edited_at): (String, Option<i64>) = conn
            .query_row(
                "SELECT content, edited_at FROM messages WHERE id = ?1",
                params![message.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(content, "hello there");
        let edited = edited_at.and_then(DateTime::<Utc>::from_timestamp_millis).unwrap();
        assert_eq!(edited.timestamp(), message.edited_at.unwrap().timestamp());
    }

    #[test]
    fn test_delete_topic_cascades() {
        let conn = test_conn();
        let (topic, _, _, _) = seed(&conn);

        let change = Change::delete(EntityKind::Topic, topic.id).to_remote(10);
        apply_change(&conn, &change).unwrap();

        for table in ["topics", "threads", "messages", "attachments"] {
            assert_eq!(count(&conn, table), 0, "{} not empty", table);
        }
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let conn = test_conn();
        let change = Change::delete(EntityKind::Message, Uuid::new_v4()).to_remote(1);
        assert_eq!(apply_change(&conn, &change).unwrap(), ApplyOutcome::Applied);
    }

    #[test]
    fn test_unknown_kind_ignored() {
        let conn = test_conn();
        let change = RemoteChange {
            sequence: 1,
            entity: "poll".to_string(),
            entity_id: Uuid::new_v4().to_string(),
            op: "upsert".to_string(),
            payload: b"{}".to_vec(),
            decode_error: None,
        };
        assert_eq!(apply_change(&conn, &change).unwrap(), ApplyOutcome::Ignored);
    }

    #[test]
    fn test_malformed_payload_is_integrity_error() {
        let conn = test_conn();
        let topic = Topic::new("general", "", "alice@cli");
        let change = upsert(EntityKind::Topic, topic.id, &topic, 1).with_payload(b"{not json".to_vec());

        let reason = expect_integrity(apply_change(&conn, &change));
        assert!(reason.contains("malformed"));
        assert_eq!(count(&conn, "topics"), 0);
    }

    #[test]
    fn test_missing_payload_is_integrity_error() {
        let conn = test_conn();
        let topic = Topic::new("general", "", "alice@cli");
        let change = upsert(EntityKind::Topic, topic.id, &topic, 1).with_payload(Vec::new());

        expect_integrity(apply_change(&conn, &change));
    }

    #[test]
    fn test_id_mismatch_is_integrity_error() {
        let conn = test_conn();
        let topic = Topic::new("general", "", "alice@cli");
        let change = upsert(EntityKind::Topic, Uuid::new_v4(), &topic, 1);

        let reason = expect_integrity(apply_change(&conn, &change));
        assert!(reason.contains("does not match"));
    }

    #[test]
    fn test_missing_parent_is_integrity_error() {
        let conn = test_conn();
        let thread = Thread::new(Uuid::new_v4(), "Orphan", "alice@cli");
        let change = upsert(EntityKind::Thread, thread.id, &thread, 1);

        let reason = expect_integrity(apply_change(&conn, &change));
        assert!(reason.contains("missing parent"));
    }

    #[test]
    fn test_topic_name_collision_is_integrity_error() {
        let conn = test_conn();
        let first = Topic::new("general", "", "alice@cli");
        let second = Topic::new("general", "", "bob@cli");
        apply_change(&conn, &upsert(EntityKind::Topic, first.id, &first, 1)).unwrap();

        let reason = expect_integrity(apply_change(&conn, &upsert(EntityKind::Topic, second.id, &second, 2)));
        assert!(reason.contains("collides"));
        assert_eq!(count(&conn, "topics"), 1);
    }

    #[test]
    fn test_attachment_upsert_keeps_data() {
        let conn = test_conn();
        let (_, _, _, mut attachment) = seed(&conn);

        attachment.filename = "b.txt".to_string();
        attachment.mime_type = "text/markdown".to_string();
        attachment.data = b"changed".to_vec();
        apply_change(&conn, &upsert(EntityKind::Attachment, attachment.id, &attachment, 5)).unwrap();

        let (filename, mime, data): (String, String, Vec<u8>) = conn
            .query_row(
                "SELECT filename, mime_type, data FROM attachments WHERE id = ?1",
                params![attachment.id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(filename, "b.txt");
        assert_eq!(mime, "text/markdown");
        assert_eq!(data, b"abc");
    }
}
