//! Conversation state: message store, pagination, live updates.
//!
//! Also hosts the interactive `read`, `watch` and `rooms --follow` commands.

mod cursor;
mod error;
mod inbox;
pub(crate) mod store;
mod view;

pub use inbox::Inbox;
pub use view::{ConversationView, SendOutcome, ViewUpdate};

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::api::client::MarketClient;
use crate::api::ChatApi;
use crate::config::Config;
use crate::live::{LiveEvent, LiveFeed};
use crate::models::{Message, MessageType};

/// Print the last `pages` pages of a conversation (no live updates).
pub async fn read(room_id: &str, pages: u32) -> Result<()> {
    let client = Arc::new(MarketClient::new()?);
    let identity = client.identity().cloned();
    let page_size = client.page_size();
    let mut view = ConversationView::mount(client, None, room_id, identity, page_size);

    let mut loaded = 0;
    loop {
        match view.next_update().await {
            ViewUpdate::PageLoaded { has_more, .. } => {
                loaded += 1;
                if loaded >= pages.max(1) || !has_more || !view.load_more() {
                    break;
                }
            }
            ViewUpdate::PageFailed(e) => return Err(e.into()),
            _ => {}
        }
    }

    print_history(&view);
    if view.cursor().has_more() {
        println!("(older messages available, use --pages)");
    }
    Ok(())
}

/// Mount a conversation and stay in it until Ctrl+C.
///
/// Lines typed on stdin are sent; `/more` loads older history, `/refresh`
/// reloads from the newest page, `/status` shows what is loaded, `/car <id>`
/// and friends send typed messages.
pub async fn watch(room_id: &str) -> Result<()> {
    let config = Config::load()?;
    let client = Arc::new(MarketClient::from_config(&config)?);

    let feed = match LiveFeed::new(&config.live_url(), client.token()) {
        Ok(feed) => {
            if let Err(e) = feed.connect() {
                tracing::warn!("Live feed unavailable: {}", e);
            }
            Some(feed)
        }
        Err(e) => {
            tracing::warn!("Live feed unavailable: {}", e);
            None
        }
    };

    let mut view = ConversationView::mount(
        client.clone(),
        feed.as_ref(),
        room_id,
        client.identity().cloned(),
        client.page_size(),
    );

    // Best effort; the server also marks read on its own schedule.
    let reader = client.clone();
    let id = room_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = reader.mark_read(&id).await {
            tracing::debug!("mark_read failed for {}: {:#}", id, e);
        }
    });

    println!("Conversation {}", view.conversation_id());
    if !view.is_live() {
        println!("(live updates off, use /refresh to check for new messages)");
    }
    println!("Type to send. /more for older messages, /refresh to reload, Ctrl+C to quit.");
    println!("{:-<60}", "");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            update = view.next_update() => print_update(&view, update),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_input(&mut view, feed.as_deref(), parse_input(&line)).await {
                        break;
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Leaving conversation...");
    drop(view);
    if let Some(feed) = feed {
        feed.shutdown();
    }
    Ok(())
}

/// List rooms and keep the list current from the live feed until Ctrl+C.
///
/// Typing a room ID marks it read and stops counting its unread messages.
pub async fn follow_rooms() -> Result<()> {
    let config = Config::load()?;
    let client = Arc::new(MarketClient::from_config(&config)?);
    let mut inbox = Inbox::new(client.list_rooms().await?, client.identity().cloned());

    println!("\nChat Rooms:");
    println!("{:-<60}", "");
    for room in inbox.rooms() {
        crate::api::print_room(room);
    }

    let feed = LiveFeed::new(&config.live_url(), client.token())?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = feed.on_message(move |event: &LiveEvent| {
        let _ = tx.send(event.clone());
    });
    let room_ids: Vec<String> = inbox.rooms().iter().map(|r| r.id.clone()).collect();
    for id in &room_ids {
        feed.subscribe(id);
    }
    feed.connect()?;

    println!(
        "Following {} rooms. Type a room ID to mark it read, Ctrl+C to quit.",
        room_ids.len()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                if !inbox.apply(&event) {
                    continue;
                }
                let total = inbox.total_unread();
                if let Some(room) = event.conversation_id().and_then(|id| inbox.get(id)) {
                    let preview = room
                        .last_message
                        .as_ref()
                        .map(|m| m.preview())
                        .unwrap_or_default();
                    println!(
                        "* {} ({} unread, {} total): {}",
                        room.display_name(),
                        room.unread_count,
                        total,
                        preview
                    );
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let id = line.trim();
                    if id.is_empty() {
                        continue;
                    }
                    if inbox.focus(id) {
                        if let Err(e) = client.mark_read(id).await {
                            tracing::warn!("Could not mark {} read: {:#}", id, e);
                        }
                        println!("Focused {}", id);
                    } else {
                        println!("Unknown room {}", id);
                    }
                }
                _ => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for id in &room_ids {
        feed.unsubscribe(id);
    }
    feed.remove_handler(handler);
    feed.shutdown();
    Ok(())
}

/// A line typed in `watch`.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    More,
    Refresh,
    Status,
    Quit,
    Send(MessageType, String),
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Send(MessageType::Text, line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "more" => Input::More,
        "refresh" => Input::Refresh,
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        // "//text" sends a literal leading slash
        _ if name.starts_with('/') => Input::Send(MessageType::Text, command.to_string()),
        _ => match MessageType::from_str(name) {
            Ok(kind) => Input::Send(kind, rest.to_string()),
            Err(_) => Input::Unknown(name.to_string()),
        },
    }
}

/// Returns false when the user asked to leave.
async fn handle_input(
    view: &mut ConversationView,
    feed: Option<&LiveFeed>,
    input: Input,
) -> bool {
    match input {
        Input::Empty => {}
        Input::More => {
            if view.is_loading() {
                println!("(still loading)");
            } else if !view.load_more() {
                println!("(no older messages to load)");
            }
        }
        Input::Refresh => view.refresh(),
        Input::Status => {
            let live = match feed {
                Some(feed) if view.is_live() && feed.is_connected() => "connected",
                Some(_) if view.is_live() => "reconnecting",
                _ => "off",
            };
            let pages = view
                .cursor()
                .loaded_page()
                .map_or("none".to_string(), |p| (p + 1).to_string());
            println!(
                "({} messages, pages loaded: {}, more: {}, live: {})",
                view.store().len(),
                pages,
                view.cursor().has_more(),
                live
            );
        }
        Input::Quit => return false,
        Input::Send(kind, content) => match view.send(&content, kind).await {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::SkippedEmpty) => println!("(nothing to send)"),
            Err(e) => eprintln!("Message not sent: {}", e),
        },
        Input::Unknown(name) => println!("Unknown command /{}", name),
    }
    true
}

fn print_update(view: &ConversationView, update: ViewUpdate) {
    match update {
        ViewUpdate::PageLoaded { page: 0, .. } => print_history(view),
        ViewUpdate::PageLoaded { added, has_more, .. } => {
            println!("--- {} older messages ---", added);
            for msg in view.store().messages().take(added) {
                println!("{}", format_message(msg, view.is_own(msg)));
            }
            if !has_more {
                println!("--- start of conversation ---");
            }
        }
        ViewUpdate::PageFailed(e) => eprintln!("{}. Type /more to retry.", e),
        ViewUpdate::Message(msg) => println!("{}", format_message(&msg, view.is_own(&msg))),
        ViewUpdate::StatusChanged { message_id, status } => {
            if let Some(msg) = view.store().get(&message_id) {
                if view.is_own(msg) {
                    println!("  ({} {})", msg.preview(), status.as_str());
                }
            }
        }
        ViewUpdate::Ignored => {}
    }
}

fn print_history(view: &ConversationView) {
    if view.store().is_empty() {
        println!("(no messages)");
        return;
    }
    for msg in view.store().messages() {
        println!("{}", format_message(msg, view.is_own(msg)));
    }
}

fn format_message(msg: &Message, own: bool) -> String {
    let time = msg.created_at.format("%Y-%m-%d %H:%M");
    if own {
        format!(
            "[{}] > {}: {} ({})",
            time,
            msg.sender.name(),
            msg.preview(),
            msg.status.as_str()
        )
    } else {
        format!("[{}]   {}: {}", time, msg.sender.name(), msg.preview())
    }
}
