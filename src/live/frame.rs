//! Live feed wire frames (JSON text frames)

use serde::{Deserialize, Serialize};

use crate::models::{DeliveryStatus, Message};

/// Client -> server frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Unsubscribe {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },
    Ping,
}

impl ClientFrame {
    pub fn encode(&self) -> String {
        // Plain enum of strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Server -> client event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveEvent {
    /// A new message was posted (including echoes of our own sends)
    Message {
        #[serde(
            rename = "conversationId",
            deserialize_with = "crate::models::string_or_number"
        )]
        conversation_id: String,
        data: Message,
    },
    /// Delivery status of a message changed
    Status {
        #[serde(
            rename = "conversationId",
            deserialize_with = "crate::models::string_or_number"
        )]
        conversation_id: String,
        #[serde(
            rename = "messageId",
            deserialize_with = "crate::models::string_or_number"
        )]
        message_id: String,
        status: DeliveryStatus,
    },
    Pong,
    /// Event types this client does not handle (typing indicators etc.)
    #[serde(other)]
    Other,
}

impl LiveEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Conversation the event belongs to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            LiveEvent::Message {
                conversation_id, ..
            }
            | LiveEvent::Status {
                conversation_id, ..
            } => Some(conversation_id),
            LiveEvent::Pong | LiveEvent::Other => None,
        }
    }
}
