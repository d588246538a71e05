//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use bbs_core::{EnqueueOutcome, Message, Thread, Topic};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a single topic
    pub fn print_topic(&self, topic: &Topic) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", topic.id);
                println!("Name:        {}", topic.name);
                if !topic.description.is_empty() {
                    println!("Description: {}", topic.description);
                }
                println!("Created by:  {}", topic.created_by);
                println!("Created:     {}", topic.created_at.format("%Y-%m-%d %H:%M"));
                if topic.archived {
                    println!("Archived:    yes");
                }
            }
            OutputFormat::Json => print_json(topic),
            OutputFormat::Quiet => println!("{}", topic.id),
        }
    }

    /// Print a list of topics
    pub fn print_topics(&self, topics: &[Topic]) {
        match self.format {
            OutputFormat::Human => {
                if topics.is_empty() {
                    println!("No topics found.");
                    return;
                }
                for topic in topics {
                    let archived = if topic.archived { " [archived]" } else { "" };
                    println!(
                        "{} | {}{} | {}",
                        short_id(&topic.id),
                        truncate(&topic.name, 30),
                        archived,
                        truncate_line(&topic.description, 45)
                    );
                }
                println!("\n{} topic(s)", topics.len());
            }
            OutputFormat::Json => print_json(&topics),
            OutputFormat::Quiet => {
                for topic in topics {
                    println!("{}", topic.id);
                }
            }
        }
    }

    /// Print a thread followed by its messages
    pub fn print_thread(&self, thread: &Thread, messages: &[Message]) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:         {}", thread.id);
                println!("Subject:    {}", thread.subject);
                println!("Topic:      {}", thread.topic_id);
                println!("Created by: {}", thread.created_by);
                println!("Created:    {}", thread.created_at.format("%Y-%m-%d %H:%M"));
                if thread.sticky {
                    println!("Sticky:     yes");
                }
                println!();
                println!("── Messages ({}) ──", messages.len());
                for message in messages {
                    print_message_block(message);
                }
            }
            OutputFormat::Json => print_json(&serde_json::json!({
                "thread": thread,
                "messages": messages,
            })),
            OutputFormat::Quiet => println!("{}", thread.id),
        }
    }

    /// Print a list of threads
    pub fn print_threads(&self, threads: &[Thread]) {
        match self.format {
            OutputFormat::Human => {
                if threads.is_empty() {
                    println!("No threads found.");
                    return;
                }
                for thread in threads {
                    let marker = if thread.sticky { "*" } else { " " };
                    println!(
                        "{}{} | {} | {}",
                        marker,
                        short_id(&thread.id),
                        truncate(&thread.subject, 45),
                        thread.created_by
                    );
                }
                println!("\n{} thread(s)", threads.len());
            }
            OutputFormat::Json => print_json(&threads),
            OutputFormat::Quiet => {
                for thread in threads {
                    println!("{}", thread.id);
                }
            }
        }
    }

    /// Print a single message
    pub fn print_message(&self, message: &Message) {
        match self.format {
            OutputFormat::Human => print_message_block(message),
            OutputFormat::Json => print_json(message),
            OutputFormat::Quiet => println!("{}", message.id),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Tell the user when a mutation could not be queued for sync
    ///
    /// The local write already happened, so this is a warning only.
    pub fn enqueue_warning(&self, outcome: &EnqueueOutcome) {
        if let EnqueueOutcome::Failed(reason) = outcome {
            if !self.is_quiet() {
                eprintln!("⚠ Saved locally but not queued for sync: {}", reason);
            }
        }
    }
}

fn print_message_block(message: &Message) {
    println!("────────────────────────────────────────");
    let edited = match message.edited_at {
        Some(at) => format!("  Edited: {}", at.format("%Y-%m-%d %H:%M")),
        None => String::new(),
    };
    println!(
        "{}  {}  {}{}",
        short_id(&message.id),
        message.created_by,
        message.created_at.format("%Y-%m-%d %H:%M"),
        edited
    );
    println!();
    println!("{}", message.content);
    println!();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode JSON: {}", e),
    }
}

/// First eight characters of an id, enough to resolve by prefix
pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
