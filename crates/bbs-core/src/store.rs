//! Local board store
//!
//! The `Store` owns the SQLite database holding topics, threads, messages
//! and attachments. Every mutation also queues a Change for replication:
//!
//! - Sync not configured: nothing is queued (`EnqueueOutcome::Skipped`)
//! - Queue write fails: the mutation still succeeds (`EnqueueOutcome::Failed`)
//! - Auto-sync on: a push is attempted right away; failures are only logged
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open()?;
//!
//! let (topic, _) = store.create_topic("general", "General chat", "alice@cli")?;
//! let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli")?;
//! store.create_message(thread.id, "hi", "alice@cli")?;
//!
//! let threads = store.list_threads(topic.id)?;
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Attachment, Message, Thread, Topic};
use crate::storage::{init_schema, needs_init, StorageError};
use crate::sync::apply::{upsert_attachment, upsert_message, upsert_thread, upsert_topic};
use crate::sync::{AutoPush, Change, EnqueueOutcome, EntityKind, Outbox, SyncError};

/// How long to wait on a lock held by another process
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Row counts for status output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoardCounts {
    pub topics: usize,
    pub threads: usize,
    pub messages: usize,
    pub attachments: usize,
}

/// Local board storage
pub struct Store {
    conn: Connection,
    config: Config,
    auto_push: Option<Box<dyn AutoPush>>,
}

// Raw rows, converted to models after the query
struct TopicRow {
    id: String,
    name: String,
    description: String,
    created_at: i64,
    created_by: String,
    archived: bool,
}

struct ThreadRow {
    id: String,
    topic_id: String,
    subject: String,
    created_at: i64,
    created_by: String,
    sticky: bool,
}

struct MessageRow {
    id: String,
    thread_id: String,
    content: String,
    created_at: i64,
    created_by: String,
    edited_at: Option<i64>,
}

struct AttachmentRow {
    id: String,
    message_id: String,
    filename: String,
    mime_type: String,
    data: Vec<u8>,
    created_at: i64,
}

const TOPIC_COLUMNS: &str = "id, name, description, created_at, created_by, archived";
const THREAD_COLUMNS: &str = "id, topic_id, subject, created_at, created_by, sticky";
const MESSAGE_COLUMNS: &str = "id, thread_id, content, created_at, created_by, edited_at";
const ATTACHMENT_COLUMNS: &str = "id, message_id, filename, mime_type, data, created_at";

impl Store {
    /// Open the store using the default configuration
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    ///
    /// Creates the data directory and schema on first use.
    pub fn open_with_config(config: Config) -> Result<Self> {
        let path = config.sqlite_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn =
            Connection::open(&path).map_err(|e| StorageError::from_sqlite(e, path.clone()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StorageError::from_sqlite(e, path.clone()))?;
        Self::with_connection(conn, config)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: Config) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        if needs_init(&conn) {
            init_schema(&conn).context("Failed to initialize SQLite schema")?;
        }

        Ok(Self {
            conn,
            config,
            auto_push: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The replication queue and watermark
    pub fn outbox(&self) -> Outbox<'_> {
        Outbox::new(&self.conn)
    }

    /// Install the hook used to push right after a mutation when auto-sync is on
    pub fn set_auto_push(&mut self, hook: Box<dyn AutoPush>) {
        self.auto_push = Some(hook);
    }

    // ==================== Topics ====================

    /// Create a topic; names are unique across archived and active topics
    pub fn create_topic(
        &mut self,
        name: &str,
        description: &str,
        created_by: &str,
    ) -> Result<(Topic, EnqueueOutcome)> {
        if name.trim().is_empty() {
            bail!("Topic name cannot be empty");
        }
        if self.get_topic_by_name(name)?.is_some() {
            bail!("Topic '{}' already exists", name);
        }

        let topic = Topic::new(name, description, created_by);
        upsert_topic(&self.conn, &topic).context("Failed to create topic")?;
        let outcome = self.record_upsert(EntityKind::Topic, topic.id, &topic);
        Ok((topic, outcome))
    }

    pub fn get_topic(&self, id: Uuid) -> Result<Option<Topic>> {
        let sql = format!("SELECT {} FROM topics WHERE id = ?1", TOPIC_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], topic_row)
            .optional()
            .context("Failed to get topic")?;
        row.map(hydrate_topic).transpose()
    }

    pub fn get_topic_by_name(&self, name: &str) -> Result<Option<Topic>> {
        let sql = format!("SELECT {} FROM topics WHERE name = ?1", TOPIC_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![name], topic_row)
            .optional()
            .context("Failed to get topic by name")?;
        row.map(hydrate_topic).transpose()
    }

    /// List topics by name; archived topics only when asked for
    pub fn list_topics(&self, include_archived: bool) -> Result<Vec<Topic>> {
        let sql = if include_archived {
            format!("SELECT {} FROM topics ORDER BY name", TOPIC_COLUMNS)
        } else {
            format!(
                "SELECT {} FROM topics WHERE archived = 0 ORDER BY name",
                TOPIC_COLUMNS
            )
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], topic_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list topics")?;
        rows.into_iter().map(hydrate_topic).collect()
    }

    pub fn set_topic_archived(&mut self, id: Uuid, archived: bool) -> Result<(Topic, EnqueueOutcome)> {
        let mut topic = self.require_topic(id)?;
        topic.archived = archived;
        upsert_topic(&self.conn, &topic).context("Failed to update topic")?;
        let outcome = self.record_upsert(EntityKind::Topic, topic.id, &topic);
        Ok((topic, outcome))
    }

    pub fn update_topic_description(
        &mut self,
        id: Uuid,
        description: &str,
    ) -> Result<(Topic, EnqueueOutcome)> {
        let mut topic = self.require_topic(id)?;
        topic.description = description.to_string();
        upsert_topic(&self.conn, &topic).context("Failed to update topic")?;
        let outcome = self.record_upsert(EntityKind::Topic, topic.id, &topic);
        Ok((topic, outcome))
    }

    /// Delete a topic and everything under it
    pub fn delete_topic(&mut self, id: Uuid) -> Result<EnqueueOutcome> {
        self.delete_row("topics", id).context("Failed to delete topic")?;
        Ok(self.record_delete(EntityKind::Topic, id))
    }

    // ==================== Threads ====================

    pub fn create_thread(
        &mut self,
        topic_id: Uuid,
        subject: &str,
        created_by: &str,
    ) -> Result<(Thread, EnqueueOutcome)> {
        self.require_topic(topic_id)?;

        let thread = Thread::new(topic_id, subject, created_by);
        upsert_thread(&self.conn, &thread).context("Failed to create thread")?;
        let outcome = self.record_upsert(EntityKind::Thread, thread.id, &thread);
        Ok((thread, outcome))
    }

    pub fn get_thread(&self, id: Uuid) -> Result<Option<Thread>> {
        let sql = format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], thread_row)
            .optional()
            .context("Failed to get thread")?;
        row.map(hydrate_thread).transpose()
    }

    /// Threads in a topic: sticky first, then newest first
    pub fn list_threads(&self, topic_id: Uuid) -> Result<Vec<Thread>> {
        let sql = format!(
            "SELECT {} FROM threads WHERE topic_id = ?1 ORDER BY sticky DESC, created_at DESC",
            THREAD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![topic_id.to_string()], thread_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list threads")?;
        rows.into_iter().map(hydrate_thread).collect()
    }

    pub fn set_thread_sticky(&mut self, id: Uuid, sticky: bool) -> Result<(Thread, EnqueueOutcome)> {
        let mut thread = self.require_thread(id)?;
        thread.sticky = sticky;
        upsert_thread(&self.conn, &thread).context("Failed to update thread")?;
        let outcome = self.record_upsert(EntityKind::Thread, thread.id, &thread);
        Ok((thread, outcome))
    }

    pub fn update_thread_subject(
        &mut self,
        id: Uuid,
        subject: &str,
    ) -> Result<(Thread, EnqueueOutcome)> {
        let mut thread = self.require_thread(id)?;
        thread.subject = subject.to_string();
        upsert_thread(&self.conn, &thread).context("Failed to update thread")?;
        let outcome = self.record_upsert(EntityKind::Thread, thread.id, &thread);
        Ok((thread, outcome))
    }

    pub fn delete_thread(&mut self, id: Uuid) -> Result<EnqueueOutcome> {
        self.delete_row("threads", id).context("Failed to delete thread")?;
        Ok(self.record_delete(EntityKind::Thread, id))
    }

    // ==================== Messages ====================

    pub fn create_message(
        &mut self,
        thread_id: Uuid,
        content: &str,
        created_by: &str,
    ) -> Result<(Message, EnqueueOutcome)> {
        self.require_thread(thread_id)?;

        let message = Message::new(thread_id, content, created_by);
        upsert_message(&self.conn, &message).context("Failed to create message")?;
        let outcome = self.record_upsert(EntityKind::Message, message.id, &message);
        Ok((message, outcome))
    }

    pub fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], message_row)
            .optional()
            .context("Failed to get message")?;
        row.map(hydrate_message).transpose()
    }

    /// Messages in a thread, oldest first
    pub fn list_messages(&self, thread_id: Uuid) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY created_at ASC",
            MESSAGE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![thread_id.to_string()], message_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list messages")?;
        rows.into_iter().map(hydrate_message).collect()
    }

    /// Replace a message's content and stamp the edit time
    pub fn edit_message(&mut self, id: Uuid, content: &str) -> Result<(Message, EnqueueOutcome)> {
        let mut message = self
            .get_message(id)?
            .with_context(|| format!("Message not found: {}", id))?;
        message.edit(content);
        upsert_message(&self.conn, &message).context("Failed to edit message")?;
        let outcome = self.record_upsert(EntityKind::Message, message.id, &message);
        Ok((message, outcome))
    }

    pub fn delete_message(&mut self, id: Uuid) -> Result<EnqueueOutcome> {
        self.delete_row("messages", id).context("Failed to delete message")?;
        Ok(self.record_delete(EntityKind::Message, id))
    }

    // ==================== Attachments ====================

    pub fn create_attachment(
        &mut self,
        message_id: Uuid,
        filename: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<(Attachment, EnqueueOutcome)> {
        if self.get_message(message_id)?.is_none() {
            bail!("Message not found: {}", message_id);
        }

        let attachment = Attachment::new(message_id, filename, mime_type, data);
        upsert_attachment(&self.conn, &attachment).context("Failed to create attachment")?;
        let outcome = self.record_upsert(EntityKind::Attachment, attachment.id, &attachment);
        Ok((attachment, outcome))
    }

    pub fn get_attachment(&self, id: Uuid) -> Result<Option<Attachment>> {
        let sql = format!("SELECT {} FROM attachments WHERE id = ?1", ATTACHMENT_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id.to_string()], attachment_row)
            .optional()
            .context("Failed to get attachment")?;
        row.map(hydrate_attachment).transpose()
    }

    pub fn list_attachments(&self, message_id: Uuid) -> Result<Vec<Attachment>> {
        let sql = format!(
            "SELECT {} FROM attachments WHERE message_id = ?1 ORDER BY created_at ASC",
            ATTACHMENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![message_id.to_string()], attachment_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list attachments")?;
        rows.into_iter().map(hydrate_attachment).collect()
    }

    pub fn delete_attachment(&mut self, id: Uuid) -> Result<EnqueueOutcome> {
        self.delete_row("attachments", id)
            .context("Failed to delete attachment")?;
        Ok(self.record_delete(EntityKind::Attachment, id))
    }

    // ==================== Stats ====================

    pub fn counts(&self) -> Result<BoardCounts> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .with_context(|| format!("Failed to count {}", table))?;
            Ok(n as usize)
        };

        Ok(BoardCounts {
            topics: count("topics")?,
            threads: count("threads")?,
            messages: count("messages")?,
            attachments: count("attachments")?,
        })
    }

    // ==================== Private helpers ====================

    fn require_topic(&self, id: Uuid) -> Result<Topic> {
        self.get_topic(id)?
            .with_context(|| format!("Topic not found: {}", id))
    }

    fn require_thread(&self, id: Uuid) -> Result<Thread> {
        self.get_thread(id)?
            .with_context(|| format!("Thread not found: {}", id))
    }

    fn delete_row(&self, table: &str, id: Uuid) -> Result<()> {
        let deleted = self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", table),
            params![id.to_string()],
        )?;
        if deleted == 0 {
            bail!("No row with id {} in {}", id, table);
        }
        Ok(())
    }

    fn record_upsert<T: Serialize>(&mut self, kind: EntityKind, id: Uuid, entity: &T) -> EnqueueOutcome {
        if !self.config.is_sync_configured() {
            return EnqueueOutcome::Skipped;
        }
        match Change::upsert(kind, id, entity) {
            Ok(change) => self.enqueue(change),
            Err(e) => {
                warn!(%kind, %id, "Failed to serialize change: {}", e);
                EnqueueOutcome::Failed(e.to_string())
            }
        }
    }

    fn record_delete(&mut self, kind: EntityKind, id: Uuid) -> EnqueueOutcome {
        if !self.config.is_sync_configured() {
            return EnqueueOutcome::Skipped;
        }
        self.enqueue(Change::delete(kind, id))
    }

    fn enqueue(&mut self, change: Change) -> EnqueueOutcome {
        if let Err(e) = Outbox::new(&self.conn).enqueue(&change) {
            warn!(entity = %change.entity, id = %change.entity_id, "Failed to queue change: {}", e);
            return EnqueueOutcome::Failed(e.to_string());
        }
        debug!(change_id = %change.id, entity = %change.entity, op = %change.op, "Queued change");

        if self.config.auto_sync {
            self.auto_push_now();
        }
        EnqueueOutcome::Queued(change.id)
    }

    fn auto_push_now(&mut self) {
        let Some(hook) = self.auto_push.as_mut() else {
            return;
        };
        match hook.push_pending(&self.conn) {
            Ok(pushed) => debug!(pushed, "Auto-sync pushed changes"),
            Err(SyncError::NotConfigured(_)) => {}
            Err(e) => warn!("Auto-sync failed: {}", e),
        }
    }
}

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid UUID: {}", id))
}

fn topic_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TopicRow> {
    Ok(TopicRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        created_by: row.get(4)?,
        archived: row.get(5)?,
    })
}

fn thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        subject: row.get(2)?,
        created_at: row.get(3)?,
        created_by: row.get(4)?,
        sticky: row.get(5)?,
    })
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        created_by: row.get(4)?,
        edited_at: row.get(5)?,
    })
}

fn attachment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttachmentRow> {
    Ok(AttachmentRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        filename: row.get(2)?,
        mime_type: row.get(3)?,
        data: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn hydrate_topic(row: TopicRow) -> Result<Topic> {
    Ok(Topic {
        id: parse_id(&row.id)?,
        name: row.name,
        description: row.description,
        created_at: timestamp(row.created_at),
        created_by: row.created_by,
        archived: row.archived,
    })
}

fn hydrate_thread(row: ThreadRow) -> Result<Thread> {
    Ok(Thread {
        id: parse_id(&row.id)?,
        topic_id: parse_id(&row.topic_id)?,
        subject: row.subject,
        created_at: timestamp(row.created_at),
        created_by: row.created_by,
        sticky: row.sticky,
    })
}

fn hydrate_message(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: parse_id(&row.id)?,
        thread_id: parse_id(&row.thread_id)?,
        content: row.content,
        created_at: timestamp(row.created_at),
        created_by: row.created_by,
        edited_at: row.edited_at.map(timestamp),
    })
}

fn hydrate_attachment(row: AttachmentRow) -> Result<Attachment> {
    Ok(Attachment {
        id: parse_id(&row.id)?,
        message_id: parse_id(&row.message_id)?,
        filename: row.filename,
        mime_type: row.mime_type,
        data: row.data,
        created_at: timestamp(row.created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fake::{FakeRemote, PASSWORD};
    use crate::sync::{apply_change, Session, SyncEngine};
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn synced_config(temp_dir: &TempDir) -> Config {
        let mut config = test_config(temp_dir);
        config.sync.server_url = Some("https://sync.example.com".to_string());
        config.sync.device_id = Some("device-1".to_string());
        config
    }

    fn seeded(store: &mut Store) -> (Topic, Thread, Message) {
        let (topic, _) = store.create_topic("general", "General chat", "alice@cli").unwrap();
        let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli").unwrap();
        let (message, _) = store.create_message(thread.id, "hi", "alice@cli").unwrap();
        (topic, thread, message)
    }

    #[test]
    fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let path = config.sqlite_path();

        let store = Store::open_with_config(config).unwrap();
        assert!(path.exists());
        assert_eq!(store.counts().unwrap(), BoardCounts::default());
    }

    #[test]
    fn test_data_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let topic_id = {
            let mut store = Store::open_with_config(test_config(&temp_dir)).unwrap();
            seeded(&mut store).0.id
        };

        let store = Store::open_with_config(test_config(&temp_dir)).unwrap();
        let topic = store.get_topic(topic_id).unwrap().unwrap();
        assert_eq!(topic.name, "general");
        assert_eq!(store.counts().unwrap().messages, 1);
    }

    #[test]
    fn test_topic_crud() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();

        let (topic, outcome) = store.create_topic("general", "General chat", "alice@cli").unwrap();
        assert_eq!(outcome, EnqueueOutcome::Skipped);

        let loaded = store.get_topic_by_name("general").unwrap().unwrap();
        assert_eq!(loaded.id, topic.id);
        assert_eq!(loaded.created_at.timestamp(), topic.created_at.timestamp());

        let (updated, _) = store.update_topic_description(topic.id, "Chatter").unwrap();
        assert_eq!(updated.description, "Chatter");

        store.set_topic_archived(topic.id, true).unwrap();
        assert!(store.list_topics(false).unwrap().is_empty());
        assert_eq!(store.list_topics(true).unwrap().len(), 1);

        store.delete_topic(topic.id).unwrap();
        assert!(store.get_topic(topic.id).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_topic_name_rejected_even_if_archived() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();

        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();
        store.set_topic_archived(topic.id, true).unwrap();

        let err = store.create_topic("general", "", "bob@cli").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_thread_ordering_sticky_then_newest() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();

        let (old, _) = store.create_thread(topic.id, "old", "alice@cli").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (new, _) = store.create_thread(topic.id, "new", "alice@cli").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (pinned, _) = store.create_thread(topic.id, "pinned", "alice@cli").unwrap();
        store.set_thread_sticky(old.id, true).unwrap();

        let ids: Vec<Uuid> = store.list_threads(topic.id).unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![old.id, pinned.id, new.id]);
    }

    #[test]
    fn test_messages_oldest_first_and_edit() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let (_, thread, first) = seeded(&mut store);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let (second, _) = store.create_message(thread.id, "second", "bob@mcp").unwrap();

        let listed = store.list_messages(thread.id).unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert!(listed[0].edited_at.is_none());

        let (edited, _) = store.edit_message(first.id, "hi there").unwrap();
        assert!(edited.edited_at.is_some());
        let reloaded = store.get_message(first.id).unwrap().unwrap();
        assert_eq!(reloaded.content, "hi there");
        assert!(reloaded.edited_at.is_some());
    }

    #[test]
    fn test_thread_requires_existing_topic() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let err = store.create_thread(Uuid::new_v4(), "x", "alice@cli").unwrap_err();
        assert!(err.to_string().contains("Topic not found"));
    }

    #[test]
    fn test_attachments() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let (_, _, message) = seeded(&mut store);

        let (att, _) = store
            .create_attachment(message.id, "notes.txt", "text/plain", b"hello".to_vec())
            .unwrap();
        let loaded = store.get_attachment(att.id).unwrap().unwrap();
        assert_eq!(loaded.data, b"hello");
        assert_eq!(store.list_attachments(message.id).unwrap().len(), 1);

        store.delete_attachment(att.id).unwrap();
        assert!(store.list_attachments(message.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_topic_cascades() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let (topic, _, message) = seeded(&mut store);
        store
            .create_attachment(message.id, "a.bin", "application/octet-stream", vec![1])
            .unwrap();

        store.delete_topic(topic.id).unwrap();
        assert_eq!(store.counts().unwrap(), BoardCounts::default());
    }

    #[test]
    fn test_delete_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(synced_config(&temp_dir)).unwrap();
        assert!(store.delete_message(Uuid::new_v4()).is_err());
        assert_eq!(store.outbox().pending_count().unwrap(), 0);
    }

    #[test]
    fn test_unconfigured_sync_queues_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        let (topic, _, _) = seeded(&mut store);
        store.set_topic_archived(topic.id, true).unwrap();
        store.delete_topic(topic.id).unwrap();

        assert_eq!(store.outbox().pending_count().unwrap(), 0);
        assert_eq!(store.outbox().watermark().unwrap(), 0);
    }

    #[test]
    fn test_configured_sync_queues_every_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(synced_config(&temp_dir)).unwrap();

        let (topic, outcome) = store.create_topic("general", "", "alice@cli").unwrap();
        assert!(outcome.is_queued());
        let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli").unwrap();
        store.set_thread_sticky(thread.id, true).unwrap();
        store.delete_thread(thread.id).unwrap();

        let pending = store.outbox().pending().unwrap();
        let summary: Vec<(EntityKind, crate::sync::Op)> =
            pending.iter().map(|c| (c.entity, c.op)).collect();
        assert_eq!(
            summary,
            vec![
                (EntityKind::Topic, crate::sync::Op::Upsert),
                (EntityKind::Thread, crate::sync::Op::Upsert),
                (EntityKind::Thread, crate::sync::Op::Upsert),
                (EntityKind::Thread, crate::sync::Op::Delete),
            ]
        );
        assert!(pending[3].payload.is_none());

        let snapshot: Thread = serde_json::from_str(pending[2].payload.as_deref().unwrap()).unwrap();
        assert!(snapshot.sticky);
    }

    /// Apply everything `from` has queued to `into`, in outbox order
    fn replay(from: &Store, into: &Store) {
        for (i, change) in from.outbox().pending().unwrap().iter().enumerate() {
            apply_change(into.connection(), &change.to_remote(i as i64 + 1)).unwrap();
        }
    }

    #[test]
    fn test_queued_mutations_replay_every_field() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = Store::open_in_memory(synced_config(&temp_dir)).unwrap();

        let (topic, _) = source.create_topic("general", "General chat", "alice@cli").unwrap();
        source.update_topic_description(topic.id, "Chatter").unwrap();
        source.set_topic_archived(topic.id, true).unwrap();
        let (thread, _) = source.create_thread(topic.id, "Hello", "alice@cli").unwrap();
        source.set_thread_sticky(thread.id, true).unwrap();
        source.update_thread_subject(thread.id, "Hello again").unwrap();
        let (message, _) = source.create_message(thread.id, "hi", "bob@mcp").unwrap();
        source.edit_message(message.id, "hi there").unwrap();
        let (att, _) = source
            .create_attachment(message.id, "notes.txt", "text/plain", b"hello".to_vec())
            .unwrap();

        let target = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        replay(&source, &target);

        let want = source.get_topic(topic.id).unwrap().unwrap();
        let got = target.get_topic(topic.id).unwrap().unwrap();
        assert_eq!(got.name, want.name);
        assert_eq!(got.description, "Chatter");
        assert_eq!(got.created_by, want.created_by);
        assert!(got.archived);
        assert_eq!(got.created_at.timestamp(), want.created_at.timestamp());

        let want = source.get_thread(thread.id).unwrap().unwrap();
        let got = target.get_thread(thread.id).unwrap().unwrap();
        assert_eq!(got.topic_id, topic.id);
        assert_eq!(got.subject, "Hello again");
        assert_eq!(got.created_by, want.created_by);
        assert!(got.sticky);
        assert_eq!(got.created_at.timestamp(), want.created_at.timestamp());

        let want = source.get_message(message.id).unwrap().unwrap();
        let got = target.get_message(message.id).unwrap().unwrap();
        assert_eq!(got.thread_id, thread.id);
        assert_eq!(got.content, "hi there");
        assert_eq!(got.created_by, "bob@mcp");
        assert_eq!(got.created_at.timestamp(), want.created_at.timestamp());
        assert_eq!(
            got.edited_at.map(|t| t.timestamp()),
            want.edited_at.map(|t| t.timestamp())
        );
        assert!(got.edited_at.is_some());

        let want = source.get_attachment(att.id).unwrap().unwrap();
        let got = target.get_attachment(att.id).unwrap().unwrap();
        assert_eq!(got.message_id, message.id);
        assert_eq!(got.filename, want.filename);
        assert_eq!(got.mime_type, want.mime_type);
        assert_eq!(got.data, b"hello");
        assert_eq!(got.created_at.timestamp(), want.created_at.timestamp());
    }

    #[test]
    fn test_fresh_board_replays_into_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = Store::open_in_memory(synced_config(&temp_dir)).unwrap();
        let (topic, thread, message) = seeded(&mut source);

        let target = Store::open_in_memory(test_config(&temp_dir)).unwrap();
        replay(&source, &target);

        assert_eq!(
            target.counts().unwrap(),
            BoardCounts {
                topics: 1,
                threads: 1,
                messages: 1,
                ..BoardCounts::default()
            }
        );
        assert_eq!(target.get_topic(topic.id).unwrap().unwrap().name, "general");
        let replayed = target.get_thread(thread.id).unwrap().unwrap();
        assert_eq!(replayed.subject, "Hello");
        assert!(!replayed.sticky);
        let replayed = target.get_message(message.id).unwrap().unwrap();
        assert_eq!(replayed.content, "hi");
        assert!(replayed.edited_at.is_none());
    }

    #[test]
    fn test_enqueue_failure_does_not_fail_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::open_in_memory(synced_config(&temp_dir)).unwrap();
        store.connection().execute_batch("DROP TABLE outbox;").unwrap();

        let (topic, outcome) = store.create_topic("general", "", "alice@cli").unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Failed(_)));
        assert!(store.get_topic(topic.id).unwrap().is_some());
    }

    #[test]
    fn test_auto_push_after_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let mut config = synced_config(&temp_dir);
        config.auto_sync = true;

        let mut session = Session::new(config.clone(), temp_dir.path().join("config.toml"));
        session
            .login(&remote, "alice@example.com", PASSWORD, "recovery words")
            .unwrap();

        let mut store = Store::open_in_memory(config).unwrap();
        store.set_auto_push(Box::new(SyncEngine::new(remote.clone(), session)));

        store.create_topic("general", "", "alice@cli").unwrap();
        assert_eq!(store.outbox().pending_count().unwrap(), 0);
        assert_eq!(remote.log().len(), 1);
    }

    #[test]
    fn test_failed_auto_push_keeps_change_queued() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::new();
        let mut config = synced_config(&temp_dir);
        config.auto_sync = true;

        let mut session = Session::new(config.clone(), temp_dir.path().join("config.toml"));
        session
            .login(&remote, "alice@example.com", PASSWORD, "recovery words")
            .unwrap();
        remote.set_offline(true);

        let mut store = Store::open_in_memory(config).unwrap();
        store.set_auto_push(Box::new(SyncEngine::new(remote.clone(), session)));

        let (topic, outcome) = store.create_topic("general", "", "alice@cli").unwrap();
        assert!(outcome.is_queued());
        assert!(store.get_topic(topic.id).unwrap().is_some());
        assert_eq!(store.outbox().pending_count().unwrap(), 1);
    }
}
