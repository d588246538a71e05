//! Message and attachment command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use bbs_core::{resolve_message, resolve_thread, Store};

use crate::output::{short_id, Output, OutputFormat};
use crate::prompt::confirm;

/// Post a message to a thread
pub fn post(
    store: &mut Store,
    thread: String,
    content: String,
    author: &str,
    output: &Output,
) -> Result<()> {
    let thread = resolve_thread(store, &thread)?;
    let (message, outcome) = store.create_message(thread.id, &content, author)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Posted to {}", thread.subject));
    output.print_message(&message);
    Ok(())
}

/// Show a message and its attachments
pub fn show(store: &Store, input: String, output: &Output) -> Result<()> {
    let message = resolve_message(store, &input)?;
    let attachments = store.list_attachments(message.id)?;

    match output.format {
        OutputFormat::Json => {
            let files: Vec<_> = attachments
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "id": a.id,
                        "filename": a.filename,
                        "mime_type": a.mime_type,
                        "size": a.size(),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({"message": message, "attachments": files})
            );
        }
        _ => {
            output.print_message(&message);
            if output.format == OutputFormat::Human && !attachments.is_empty() {
                println!("── Attachments ({}) ──", attachments.len());
                for a in &attachments {
                    println!(
                        "{} | {} | {} | {} bytes",
                        short_id(&a.id),
                        a.filename,
                        a.mime_type,
                        a.size()
                    );
                }
            }
        }
    }
    Ok(())
}

pub fn edit(store: &mut Store, input: String, content: String, output: &Output) -> Result<()> {
    let message = resolve_message(store, &input)?;
    let (message, outcome) = store.edit_message(message.id, &content)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Edited message: {}", short_id(&message.id)));
    Ok(())
}

pub fn delete(store: &mut Store, input: String, force: bool, output: &Output) -> Result<()> {
    let message = resolve_message(store, &input)?;

    if !force && output.should_prompt() {
        let preview: String = message.content.chars().take(50).collect();
        println!(
            "Delete message: {} - {}",
            short_id(&message.id),
            preview.replace('\n', " ")
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let outcome = store
        .delete_message(message.id)
        .context("Failed to delete message")?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Deleted message: {}", short_id(&message.id)));
    Ok(())
}

/// Attach a file to a message
pub fn attach(
    store: &mut Store,
    input: String,
    path: PathBuf,
    mime_type: Option<String>,
    output: &Output,
) -> Result<()> {
    let message = resolve_message(store, &input)?;
    let data = std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file: {:?}", path))?;
    let mime_type = mime_type
        .unwrap_or_else(|| mime_guess::from_path(&path).first_or_octet_stream().to_string());

    let (attachment, outcome) = store.create_attachment(message.id, &filename, &mime_type, data)?;

    output.enqueue_warning(&outcome);
    output.success(&format!(
        "Attached {} ({} bytes) to {}",
        attachment.filename,
        attachment.size(),
        short_id(&message.id)
    ));
    if output.is_quiet() {
        println!("{}", attachment.id);
    }
    Ok(())
}

/// Remove an attachment by full id
pub fn detach(store: &mut Store, id: String, output: &Output) -> Result<()> {
    let id = uuid::Uuid::parse_str(id.trim()).with_context(|| format!("Invalid attachment ID: {}", id))?;
    let outcome = store.delete_attachment(id)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Removed attachment: {}", short_id(&id)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbs_core::Config;
    use tempfile::TempDir;

    fn test_store(temp_dir: &TempDir) -> Store {
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        Store::open_in_memory(config).unwrap()
    }

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_attach_detects_mime_type_from_extension() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);
        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();
        let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli").unwrap();
        let (message, _) = store.create_message(thread.id, "hi", "alice@cli").unwrap();

        for name in ["photo.JPEG", "Makefile", "data.bin"] {
            let file = temp_dir.path().join(name);
            std::fs::write(&file, b"x").unwrap();
            attach(&mut store, message.id.to_string(), file, None, &quiet()).unwrap();
        }
        let file = temp_dir.path().join("raw.txt");
        std::fs::write(&file, b"x").unwrap();
        attach(
            &mut store,
            message.id.to_string(),
            file,
            Some("text/x-custom".into()),
            &quiet(),
        )
        .unwrap();

        let mime_of = |filename: &str| {
            store
                .list_attachments(message.id)
                .unwrap()
                .into_iter()
                .find(|a| a.filename == filename)
                .map(|a| a.mime_type)
                .unwrap()
        };
        assert_eq!(mime_of("photo.JPEG"), "image/jpeg");
        assert_eq!(mime_of("Makefile"), "application/octet-stream");
        assert_eq!(mime_of("data.bin"), "application/octet-stream");
        assert_eq!(mime_of("raw.txt"), "text/x-custom");
    }

    #[test]
    fn test_post_edit_and_attach() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);
        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();
        let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli").unwrap();

        post(&mut store, thread.id.to_string(), "hi".into(), "alice@cli", &quiet()).unwrap();
        let message = store.list_messages(thread.id).unwrap().remove(0);
        let prefix = message.id.to_string()[..8].to_string();

        edit(&mut store, prefix.clone(), "hello".into(), &quiet()).unwrap();
        let edited = store.get_message(message.id).unwrap().unwrap();
        assert_eq!(edited.content, "hello");
        assert!(edited.edited_at.is_some());

        let file = temp_dir.path().join("notes.txt");
        std::fs::write(&file, b"some notes").unwrap();
        attach(&mut store, prefix, file, None, &quiet()).unwrap();

        let attachments = store.list_attachments(message.id).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "notes.txt");
        assert_eq!(attachments[0].mime_type, "text/plain");
        assert_eq!(attachments[0].data, b"some notes");

        detach(&mut store, attachments[0].id.to_string(), &quiet()).unwrap();
        assert!(store.list_attachments(message.id).unwrap().is_empty());
    }

    #[test]
    fn test_attach_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);
        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();
        let (thread, _) = store.create_thread(topic.id, "Hello", "alice@cli").unwrap();
        let (message, _) = store.create_message(thread.id, "hi", "alice@cli").unwrap();

        let missing = temp_dir.path().join("missing.bin");
        assert!(attach(&mut store, message.id.to_string(), missing, None, &quiet()).is_err());
    }
}
