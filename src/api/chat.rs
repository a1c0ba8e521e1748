//! Chat REST endpoints (rooms, history, send)

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::client::MarketClient;
use crate::models::{ChatRoom, HistoryPage, OutgoingMessage};

/// Backend operations a conversation view depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch one history page, newest message first.
    async fn fetch_history(&self, room_id: &str, page: u32, size: u32) -> Result<HistoryPage>;

    /// Submit a message. The backend echoes it over the live feed.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<()>;

    async fn list_rooms(&self) -> Result<Vec<ChatRoom>>;

    /// Tell the backend everything in `room_id` has been read.
    async fn mark_read(&self, room_id: &str) -> Result<()>;
}

#[async_trait]
impl ChatApi for MarketClient {
    async fn fetch_history(&self, room_id: &str, page: u32, size: u32) -> Result<HistoryPage> {
        let path = format!("/api/chat/rooms/{}/messages", room_id);
        let resp = self
            .get_query(
                &path,
                &[("page", page.to_string()), ("size", size.to_string())],
            )
            .await?;

        let body: HistoryPage = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse history page {} of room {}", page, room_id))?;

        tracing::debug!(
            "Room {} page {}: {} messages, {} pages total",
            room_id,
            page,
            body.content.len(),
            body.total_pages
        );
        Ok(body)
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<()> {
        tracing::debug!(
            "Sending {} message to room {} (client id {})",
            message.message_type,
            message.conversation_id,
            message.client_message_id
        );
        self.post("/api/chat/messages", message).await?;
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<ChatRoom>> {
        let resp = self.get("/api/chat/rooms").await?;
        resp.json()
            .await
            .context("Failed to parse chat rooms response")
    }

    async fn mark_read(&self, room_id: &str) -> Result<()> {
        self.post_empty(&format!("/api/chat/rooms/{}/read", room_id))
            .await?;
        Ok(())
    }
}
