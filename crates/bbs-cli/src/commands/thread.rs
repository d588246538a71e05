//! Thread command handlers

use anyhow::{Context, Result};

use bbs_core::{resolve_thread, resolve_topic, Store};

use crate::output::Output;
use crate::prompt::confirm;

/// Start a thread in a topic, optionally with its first message
pub fn create(
    store: &mut Store,
    topic: String,
    subject: String,
    content: Option<String>,
    author: &str,
    output: &Output,
) -> Result<()> {
    let topic = resolve_topic(store, &topic)?;
    let (thread, outcome) = store.create_thread(topic.id, &subject, author)?;
    output.enqueue_warning(&outcome);

    if let Some(content) = content {
        let (_, outcome) = store.create_message(thread.id, &content, author)?;
        output.enqueue_warning(&outcome);
    }

    output.success(&format!("Created thread in {}: {}", topic.name, thread.subject));
    let messages = store.list_messages(thread.id)?;
    output.print_thread(&thread, &messages);
    Ok(())
}

/// List threads in a topic, sticky threads first
pub fn list(store: &Store, topic: String, output: &Output) -> Result<()> {
    let topic = resolve_topic(store, &topic)?;
    let threads = store.list_threads(topic.id)?;
    output.print_threads(&threads);
    Ok(())
}

/// Show a thread with its messages
pub fn show(store: &Store, input: String, output: &Output) -> Result<()> {
    let thread = resolve_thread(store, &input)?;
    let messages = store.list_messages(thread.id)?;
    output.print_thread(&thread, &messages);
    Ok(())
}

pub fn set_sticky(store: &mut Store, input: String, sticky: bool, output: &Output) -> Result<()> {
    let thread = resolve_thread(store, &input)?;
    let (thread, outcome) = store.set_thread_sticky(thread.id, sticky)?;

    output.enqueue_warning(&outcome);
    let verb = if sticky { "Pinned" } else { "Unpinned" };
    output.success(&format!("{} thread: {}", verb, thread.subject));
    Ok(())
}

pub fn rename(store: &mut Store, input: String, subject: String, output: &Output) -> Result<()> {
    let thread = resolve_thread(store, &input)?;
    let (thread, outcome) = store.update_thread_subject(thread.id, &subject)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Renamed thread: {}", thread.subject));
    Ok(())
}

/// Delete a thread and its messages
pub fn delete(store: &mut Store, input: String, force: bool, output: &Output) -> Result<()> {
    let thread = resolve_thread(store, &input)?;

    if !force && output.should_prompt() {
        println!("Delete thread: {}", thread.subject);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let outcome = store
        .delete_thread(thread.id)
        .context("Failed to delete thread")?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Deleted thread: {}", thread.subject));
    Ok(())
}
