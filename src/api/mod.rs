//! API client module for the marketplace chat backend

mod chat;
pub mod client;
mod me;

pub use chat::ChatApi;

use anyhow::{bail, Result};

use crate::models::{MessageType, OutgoingMessage};
use client::MarketClient;

/// List chat rooms (prints to stdout).
pub async fn list_rooms() -> Result<()> {
    let client = MarketClient::new()?;
    let rooms = client.list_rooms().await?;

    println!("\nChat Rooms:");
    println!("{:-<60}", "");

    if rooms.is_empty() {
        println!("  (no conversations)");
        return Ok(());
    }

    for room in &rooms {
        print_room(room);
    }

    Ok(())
}

/// Print one room entry in list form.
pub fn print_room(room: &crate::models::ChatRoom) {
    if room.unread_count > 0 {
        println!("{} ({} unread)", room.display_name(), room.unread_count);
    } else {
        println!("{}", room.display_name());
    }
    println!("  ID: {}  [{}]", room.id, room.room_type.as_str());
    if let Some(ref car) = room.related_car {
        println!("  Car: #{}", car.id);
    }
    if let Some(ref last) = room.last_message {
        let sender = last.sender_username.as_deref().unwrap_or("?");
        println!(
            "  [{}] {}: {}",
            last.created_at.format("%Y-%m-%d %H:%M"),
            sender,
            last.preview()
        );
    }
    println!();
}

/// Send a message to a room.
pub async fn send_message(to: &str, message: &str, kind: MessageType) -> Result<()> {
    if message.trim().is_empty() {
        bail!("Refusing to send an empty message");
    }
    let client = MarketClient::new()?;
    client
        .send_message(&OutgoingMessage::new(to, message, kind))
        .await?;
    println!("Message sent.");
    Ok(())
}

/// Show current user info
pub async fn whoami() -> Result<()> {
    me::whoami().await
}
