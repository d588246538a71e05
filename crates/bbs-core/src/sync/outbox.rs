//! Outbox and watermark persistence
//!
//! Pending Changes and the pull watermark live in the `outbox` and
//! `sync_state` tables of the local database, so they survive restarts and
//! a cancelled or failed round can resume where it stopped.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use super::change::{Change, EntityKind, Op};
use crate::storage::{StorageError, StorageResult};

/// Key of the watermark row in `sync_state`
const WATERMARK_KEY: &str = "watermark";

/// Raw outbox row before decoding
struct OutboxRow {
    id: String,
    entity: String,
    entity_id: String,
    op: String,
    payload: Option<String>,
    created_at: i64,
}

/// Durable queue of local Changes awaiting push
pub struct Outbox<'a> {
    conn: &'a Connection,
}

impl<'a> Outbox<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Append a Change to the queue
    pub fn enqueue(&self, change: &Change) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO outbox (id, entity, entity_id, op, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                change.id,
                change.entity.as_str(),
                change.entity_id.to_string(),
                change.op.as_str(),
                change.payload,
                change.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Oldest pending Changes, at most `limit`
    pub fn oldest(&self, limit: usize) -> StorageResult<Vec<Change>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity, entity_id, op, payload, created_at
             FROM outbox ORDER BY rowid ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_outbox)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(hydrate).collect()
    }

    /// Every pending Change, oldest first
    pub fn pending(&self) -> StorageResult<Vec<Change>> {
        self.oldest(i64::MAX as usize)
    }

    /// Number of pending Changes
    pub fn pending_count(&self) -> StorageResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove acknowledged Changes, returning how many rows were deleted
    pub fn remove(&self, ids: &[String]) -> StorageResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM outbox WHERE id IN ({})", placeholders);
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    /// Highest remote sequence applied locally (0 when nothing was pulled)
    pub fn watermark(&self) -> StorageResult<i64> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![WATERMARK_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            None => Ok(0),
            Some(v) => v.parse().map_err(|_| StorageError::CorruptRow {
                table: "sync_state",
                id: WATERMARK_KEY.to_string(),
                detail: format!("not an integer: {}", v),
            }),
        }
    }

    /// Move the watermark forward to `sequence`
    ///
    /// Returns false and leaves the stored value untouched when `sequence`
    /// is not greater than the current watermark.
    pub fn advance_watermark(&self, sequence: i64) -> StorageResult<bool> {
        if sequence <= self.watermark()? {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![WATERMARK_KEY, sequence.to_string()],
        )?;
        Ok(true)
    }

    /// Drop every pending Change and reset the watermark
    pub fn wipe(&self) -> StorageResult<()> {
        self.conn.execute_batch(
            "DELETE FROM outbox; DELETE FROM sync_state WHERE key = 'watermark';",
        )?;
        Ok(())
    }
}

fn row_to_outbox(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxRow> {
    Ok(OutboxRow {
        id: row.get(0)?,
        entity: row.get(1)?,
        entity_id: row.get(2)?,
        op: row.get(3)?,
        payload: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn hydrate(row: OutboxRow) -> StorageResult<Change> {
    let corrupt = |detail: String| StorageError::CorruptRow {
        table: "outbox",
        id: row.id.clone(),
        detail,
    };

    let entity = EntityKind::parse(&row.entity)
        .ok_or_else(|| corrupt(format!("unknown entity kind '{}'", row.entity)))?;
    let op = Op::parse(&row.op).ok_or_else(|| corrupt(format!("unknown op '{}'", row.op)))?;
    let entity_id = Uuid::parse_str(&row.entity_id)
        .map_err(|e| corrupt(format!("invalid entity id '{}': {}", row.entity_id, e)))?;
    let created_at = DateTime::from_timestamp_millis(row.created_at).unwrap_or_else(Utc::now);

    Ok(Change {
        id: row.id,
        entity,
        entity_id,
        op,
        payload: row.payload,
        created_at,
    })
}
