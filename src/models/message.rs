//! Message-related models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire;

/// Message content kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    /// Content is the id of a car listing
    CarReference,
    /// Content is the id or username of a marketplace user
    UserReference,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::CarReference => "car",
            MessageType::UserReference => "user",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "car" | "car_reference" => Ok(MessageType::CarReference),
            "user" | "user_reference" => Ok(MessageType::UserReference),
            other => Err(format!(
                "unknown message type '{}' (expected text, image, file, car, user)",
                other
            )),
        }
    }
}

/// Server-reported delivery state, ordered sent < delivered < read
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }
}

/// Message author as embedded in message payloads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default, deserialize_with = "wire::opt_string_or_number")]
    pub id: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
}

impl Sender {
    /// Name to show next to a message.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.username)
    }
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(deserialize_with = "wire::string_or_number")]
    pub id: String,
    #[serde(alias = "chatRoomId", deserialize_with = "wire::string_or_number")]
    pub conversation_id: String,
    pub sender: Sender,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub status: DeliveryStatus,
    #[serde(deserialize_with = "wire::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// One-line rendering of the content, tagged by kind.
    pub fn preview(&self) -> String {
        let content = self.content.trim();
        match self.message_type {
            MessageType::Text => content.to_string(),
            MessageType::Image => format!("[image] {}", content),
            MessageType::File => format!("[file] {}", content),
            MessageType::CarReference => format!("[car #{}]", content),
            MessageType::UserReference => format!("[user @{}]", content),
        }
    }
}

/// One page of conversation history as returned by the backend.
///
/// `content` is newest-first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    #[serde(default)]
    pub content: Vec<Message>,
    #[serde(default)]
    pub total_pages: u32,
    /// Page index echoed by the server
    pub number: Option<u32>,
}

/// Request body for the send endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(rename = "chatRoomId")]
    pub conversation_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub client_message_id: String,
}

impl OutgoingMessage {
    pub fn new(conversation_id: &str, content: &str, message_type: MessageType) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            message_type,
            client_message_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_message_numeric_ids() {
        let json = r#"{
            "id": 42,
            "chatRoomId": 7,
            "sender": {"id": 3, "username": "marta", "displayName": "Marta R."},
            "content": "Is the Golf still available?",
            "messageType": "TEXT",
            "status": "DELIVERED",
            "createdAt": "2024-05-01T10:00:00.5"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.conversation_id, "7");
        assert_eq!(msg.sender.id.as_deref(), Some("3"));
        assert_eq!(msg.sender.name(), "Marta R.");
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_deserialize_message_defaults() {
        let json = r#"{
            "id": "m-1",
            "conversationId": "room-1",
            "sender": {"username": "dealer"},
            "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.status, DeliveryStatus::Sent);
        assert_eq!(msg.sender.name(), "dealer");
        assert!(msg.content.is_empty());
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let json = r#"{
            "id": 1, "conversationId": 1, "sender": {"username": "x"},
            "messageType": "STICKER", "createdAt": "2024-05-01T10:00:00Z"
        }"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_message_type_from_str() {
        assert_eq!("car".parse::<MessageType>(), Ok(MessageType::CarReference));
        assert_eq!(
            "USER-REFERENCE".parse::<MessageType>(),
            Ok(MessageType::UserReference)
        );
        assert!("video".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_outgoing_message_body() {
        let out = OutgoingMessage::new("9", "hello", MessageType::CarReference);
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["chatRoomId"], "9");
        assert_eq!(v["messageType"], "CAR_REFERENCE");
        assert_eq!(v["content"], "hello");
        assert!(v["clientMessageId"].as_str().is_some());
    }

    #[test]
    fn test_history_page_spring_shape() {
        let json = r#"{"content": [], "totalPages": 0, "number": 0, "size": 50, "last": true}"#;
        let page: HistoryPage = serde_json::from_str(json).unwrap();
        assert!(page.content.is_empty());
        assert_eq!(page.number, Some(0));
    }
}
