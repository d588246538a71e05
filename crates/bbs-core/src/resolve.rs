//! Entity resolution
//!
//! Turns what a user or agent typed into a canonical entity. Tried in order:
//!
//! 1. A full UUID, looked up directly
//! 2. An exact topic name (topics only)
//! 3. A unique id prefix
//!
//! Ambiguous prefixes are reported with the number of matches, never guessed.

use rusqlite::params;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Message, Thread, Topic};
use crate::store::Store;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("{kind} not found: {input}")]
    NotFound { kind: &'static str, input: String },

    #[error("ambiguous {kind} ID prefix '{input}' matches {count} {kind}s")]
    Ambiguous {
        kind: &'static str,
        input: String,
        count: usize,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ResolveError {
    fn from(err: rusqlite::Error) -> Self {
        ResolveError::Store(err.into())
    }
}

pub fn resolve_topic(store: &Store, input: &str) -> Result<Topic, ResolveError> {
    let input = input.trim();

    if let Ok(id) = Uuid::parse_str(input) {
        if let Some(topic) = store.get_topic(id)? {
            return Ok(topic);
        }
    }

    if let Some(topic) = store.get_topic_by_name(input)? {
        return Ok(topic);
    }

    let id = unique_prefix(store, "topics", "topic", input)?;
    store.get_topic(id)?.ok_or_else(|| not_found("topic", input))
}

pub fn resolve_thread(store: &Store, input: &str) -> Result<Thread, ResolveError> {
    let input = input.trim();

    if let Ok(id) = Uuid::parse_str(input) {
        if let Some(thread) = store.get_thread(id)? {
            return Ok(thread);
        }
    }

    let id = unique_prefix(store, "threads", "thread", input)?;
    store.get_thread(id)?.ok_or_else(|| not_found("thread", input))
}

pub fn resolve_message(store: &Store, input: &str) -> Result<Message, ResolveError> {
    let input = input.trim();

    if let Ok(id) = Uuid::parse_str(input) {
        if let Some(message) = store.get_message(id)? {
            return Ok(message);
        }
    }

    let id = unique_prefix(store, "messages", "message", input)?;
    store.get_message(id)?.ok_or_else(|| not_found("message", input))
}

fn not_found(kind: &'static str, input: &str) -> ResolveError {
    ResolveError::NotFound {
        kind,
        input: input.to_string(),
    }
}

/// Id of the single row in `table` whose id starts with `prefix`
fn unique_prefix(
    store: &Store,
    table: &str,
    kind: &'static str,
    prefix: &str,
) -> Result<Uuid, ResolveError> {
    if prefix.is_empty() {
        return Err(not_found(kind, prefix));
    }

    let prefix = prefix.to_lowercase();
    let sql = format!(
        "SELECT id FROM {} WHERE substr(id, 1, length(?1)) = ?1 LIMIT 2",
        table
    );
    let mut stmt = store.connection().prepare(&sql)?;
    let ids = stmt
        .query_map(params![prefix], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match ids.as_slice() {
        [] => Err(not_found(kind, &prefix)),
        [id] => Uuid::parse_str(id).map_err(|_| not_found(kind, &prefix)),
        _ => {
            let count: i64 = store.connection().query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE substr(id, 1, length(?1)) = ?1",
                    table
                ),
                params![prefix],
                |row| row.get(0),
            )?;
            Err(ResolveError::Ambiguous {
                kind,
                input: prefix,
                count: count as usize,
            })
        }
    }
}
