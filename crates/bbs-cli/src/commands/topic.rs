//! Topic command handlers

use anyhow::{Context, Result};

use bbs_core::{resolve_topic, Store};

use crate::output::Output;
use crate::prompt::confirm;

/// Create a new topic
pub fn create(
    store: &mut Store,
    name: String,
    description: Option<String>,
    author: &str,
    output: &Output,
) -> Result<()> {
    let description = description.unwrap_or_default();
    let (topic, outcome) = store.create_topic(&name, &description, author)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Created topic: {}", topic.name));
    output.print_topic(&topic);
    Ok(())
}

/// List topics
pub fn list(store: &Store, all: bool, output: &Output) -> Result<()> {
    let topics = store.list_topics(all)?;
    output.print_topics(&topics);
    Ok(())
}

/// Show a topic and its threads
pub fn show(store: &Store, input: String, output: &Output) -> Result<()> {
    let topic = resolve_topic(store, &input)?;
    let threads = store.list_threads(topic.id)?;

    output.print_topic(&topic);
    if !output.is_quiet() && !output.is_json() {
        println!();
    }
    output.print_threads(&threads);
    Ok(())
}

/// Archive or restore a topic
pub fn set_archived(store: &mut Store, input: String, archived: bool, output: &Output) -> Result<()> {
    let topic = resolve_topic(store, &input)?;
    let (topic, outcome) = store.set_topic_archived(topic.id, archived)?;

    output.enqueue_warning(&outcome);
    let verb = if archived { "Archived" } else { "Unarchived" };
    output.success(&format!("{} topic: {}", verb, topic.name));
    Ok(())
}

/// Replace a topic's description
pub fn describe(store: &mut Store, input: String, description: String, output: &Output) -> Result<()> {
    let topic = resolve_topic(store, &input)?;
    let (topic, outcome) = store.update_topic_description(topic.id, &description)?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Updated topic: {}", topic.name));
    Ok(())
}

/// Delete a topic with all of its threads and messages
pub fn delete(store: &mut Store, input: String, force: bool, output: &Output) -> Result<()> {
    let topic = resolve_topic(store, &input)?;

    if !force && output.should_prompt() {
        let threads = store.list_threads(topic.id)?.len();
        println!("Delete topic: {} ({} thread(s))", topic.name, threads);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let outcome = store
        .delete_topic(topic.id)
        .context("Failed to delete topic")?;

    output.enqueue_warning(&outcome);
    output.success(&format!("Deleted topic: {}", topic.name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
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
    fn test_create_and_archive_by_name() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);

        create(&mut store, "general".into(), None, "alice@cli", &quiet()).unwrap();
        set_archived(&mut store, "general".into(), true, &quiet()).unwrap();

        assert!(store.list_topics(false).unwrap().is_empty());
        assert!(store.get_topic_by_name("general").unwrap().unwrap().archived);
    }

    #[test]
    fn test_describe_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);
        let (topic, _) = store.create_topic("general", "", "alice@cli").unwrap();

        let prefix = topic.id.to_string()[..8].to_string();
        describe(&mut store, prefix, "everything else".into(), &quiet()).unwrap();

        let topic = store.get_topic(topic.id).unwrap().unwrap();
        assert_eq!(topic.description, "everything else");
    }

    #[test]
    fn test_delete_without_prompt_in_quiet_mode() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);
        store.create_topic("general", "", "alice@cli").unwrap();

        delete(&mut store, "general".into(), false, &quiet()).unwrap();
        assert!(store.get_topic_by_name("general").unwrap().is_none());
    }

    #[test]
    fn test_unknown_topic_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = test_store(&temp_dir);

        let err = set_archived(&mut store, "nope".into(), true, &quiet()).unwrap_err();
        assert_eq!(err.to_string(), "topic not found: nope");
    }
}
