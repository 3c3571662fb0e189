//! rivulet-replay - CLI tool to replay a recorded event stream
//!
//! Reads wire events as JSON Lines (one event per line), feeds them through
//! the conversation store exactly as a live transport would, and prints the
//! reconstructed conversation. Useful for debugging server captures and for
//! verifying that a recorded stream converges to the expected state.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/rivulet/rivulet.log (~/.local/state/rivulet/rivulet.log)
//! - Config: $XDG_CONFIG_HOME/rivulet/config.toml (~/.config/rivulet/config.toml)

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;

use rivulet_core::protocol::StreamEvent;
use rivulet_core::types::{Message, MessageKind};
use rivulet_core::{ChatStore, Config, Segment};

#[derive(Parser)]
#[command(name = "rivulet-replay")]
#[command(about = "Replay a recorded event stream into conversation state")]
#[command(version)]
struct Args {
    /// Event stream file (JSON Lines), or `-` for stdin
    stream: PathBuf,

    /// Only show this chat
    #[arg(long)]
    chat: Option<String>,

    /// Emit the reconstructed state as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Verbose output (-v per-message segments, -vv raw event counts)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// JSON report shape for `--json`
#[derive(Serialize)]
struct ReplayReport<'a> {
    events_applied: usize,
    events_skipped: usize,
    chats: Vec<ChatReport<'a>>,
}

#[derive(Serialize)]
struct ChatReport<'a> {
    chat_id: &'a str,
    active_path: &'a [String],
    messages: Vec<MessageReport<'a>>,
}

#[derive(Serialize)]
struct MessageReport<'a> {
    message: &'a Message,
    segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    research: Option<&'a rivulet_core::types::ResearchProgress>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration (defaults if no config file exists)
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        rivulet_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!(stream = %args.stream.display(), "rivulet-replay starting");

    let mut store = ChatStore::new(&config);
    let (applied, skipped) = feed_stream(&mut store, &args)?;

    // Give orphaned queues their final expiry pass
    store.flush_expired(Instant::now());

    if args.json {
        print_json(&store, &args, applied, skipped)?;
    } else {
        print_text(&store, &args, applied, skipped);
    }

    tracing::info!(applied, skipped, "rivulet-replay complete");
    Ok(())
}

/// Feed every line of the stream file into the store.
///
/// Malformed lines are counted and skipped rather than aborting the replay;
/// a capture from a flaky transport often has a truncated tail.
fn feed_stream(store: &mut ChatStore, args: &Args) -> Result<(usize, usize)> {
    let reader: Box<dyn BufRead> = if args.stream.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.stream)
            .with_context(|| format!("failed to open {}", args.stream.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut applied = 0usize;
    let mut skipped = 0usize;

    for (line_number, line) in reader.lines().enumerate() {
        let line = line.context("failed to read stream")?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<StreamEvent>(&line) {
            Ok(event) => {
                store.apply_event(event);
                applied += 1;
            }
            Err(e) => {
                tracing::warn!(line = line_number + 1, error = %e, "skipping malformed event");
                skipped += 1;
            }
        }
    }

    Ok((applied, skipped))
}

fn print_json(store: &ChatStore, args: &Args, applied: usize, skipped: usize) -> Result<()> {
    let chats: Vec<ChatReport> = store
        .chat_ids()
        .into_iter()
        .filter(|id| args.chat.as_deref().map(|c| c == *id).unwrap_or(true))
        .map(|chat_id| ChatReport {
            chat_id,
            active_path: store.active_path(chat_id),
            messages: store
                .active_path(chat_id)
                .iter()
                .filter_map(|id| store.message(id))
                .map(|message| MessageReport {
                    message,
                    segments: store.segments(&message.message_id),
                    research: store.research_progress(&message.message_id),
                })
                .collect(),
        })
        .collect();

    let report = ReplayReport {
        events_applied: applied,
        events_skipped: skipped,
        chats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_text(store: &ChatStore, args: &Args, applied: usize, skipped: usize) {
    println!("Replay complete:");
    println!("  Events applied: {}", applied);
    println!("  Events skipped: {}", skipped);

    for chat_id in store.chat_ids() {
        if let Some(filter) = args.chat.as_deref() {
            if filter != chat_id {
                continue;
            }
        }

        let path = store.active_path(chat_id);
        println!(
            "\nChat {} ({} message(s), active path {})",
            chat_id,
            store.chat_message_ids(chat_id).len(),
            path.len()
        );

        for message_id in path {
            let Some(message) = store.message(message_id) else {
                continue;
            };
            print_message(store, message, args.verbose);
        }
    }
}

fn print_message(store: &ChatStore, message: &Message, verbose: u8) {
    let marker = match message.kind {
        MessageKind::Request => ">",
        MessageKind::Response => "<",
    };
    let preview = preview_text(&message.text_content());
    println!(
        "  {} [{}] {} {}",
        marker,
        message.status.as_str(),
        message.message_id,
        preview
    );

    if let Some((index, count)) = store.sibling_position(&message.message_id) {
        if count > 1 {
            println!("      branch {}/{}", index + 1, count);
        }
    }

    if verbose >= 1 {
        for segment in store.segments(&message.message_id) {
            match segment {
                Segment::Text { content } => {
                    println!("      text: {}", preview_text(&content));
                }
                Segment::Reasoning { content } => {
                    println!("      reasoning: {}", preview_text(&content));
                }
                Segment::Status { title, text, .. } => {
                    println!("      status: {} {}", title, preview_text(&text));
                }
                Segment::ToolCall {
                    tool_name, result, ..
                } => {
                    let state = if result.is_some() { "done" } else { "pending" };
                    println!("      tool: {} ({})", tool_name, state);
                }
                Segment::Document { title, .. } => {
                    println!("      document: {}", title);
                }
                Segment::Citation {
                    reference_number, ..
                } => {
                    println!("      citation: [{}]", reference_number.unwrap_or(0));
                }
                Segment::Image { pointer, .. } => {
                    println!("      image: {}", pointer);
                }
            }
        }
    }

    if verbose >= 1 {
        if let Some(progress) = store.research_progress(&message.message_id) {
            for update in &progress.updates {
                println!("      progress: {} {}", update.title, preview_text(&update.text));
            }
        }
    }

    if verbose >= 2 {
        println!(
            "      events: {}",
            message.event_data.event_history.len()
        );
    }
}

/// First line, truncated for display. Counts characters, not bytes, so
/// multi-byte content never splits mid-character.
fn preview_text(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    match first_line.char_indices().nth(72) {
        Some((cut, _)) => format!("{}...", &first_line[..cut]),
        None => first_line.to_string(),
    }
}
