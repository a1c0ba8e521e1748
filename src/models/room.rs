//! Chat room (conversation) models

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::message::{Message, MessageType};
use super::wire;

/// Conversation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    Private,
    Group,
    /// Buyer/seller thread attached to a car listing
    CarInquiry,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Private => "private",
            RoomType::Group => "group",
            RoomType::CarInquiry => "car inquiry",
        }
    }
}

/// Car listing a conversation is about
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarRef {
    #[serde(deserialize_with = "wire::string_or_number")]
    pub id: String,
    pub title: Option<String>,
}

/// Denormalized copy of a room's newest message, for list display
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default)]
    pub content: String,
    pub sender_username: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(deserialize_with = "wire::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for LastMessage {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            sender_username: Some(msg.sender.username.clone()),
            message_type: msg.message_type,
            created_at: msg.created_at,
        }
    }
}

impl LastMessage {
    pub fn preview(&self) -> String {
        match self.message_type {
            MessageType::Text => self.content.trim().to_string(),
            kind => format!("[{}] {}", kind, self.content.trim()),
        }
    }
}

/// Chat room entity
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    #[serde(deserialize_with = "wire::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "type")]
    pub room_type: RoomType,
    #[serde(alias = "car")]
    pub related_car: Option<CarRef>,
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

impl ChatRoom {
    /// Display name, falling back to the listing title or the room id.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        if let Some(title) = self.related_car.as_ref().and_then(|c| c.title.as_deref()) {
            return title.to_string();
        }
        format!("room {}", self.id)
    }

    /// Reflect an incoming message locally until the server state is refetched.
    ///
    /// Older messages than the current snapshot leave it in place.
    pub fn record_message(&mut self, msg: &Message, count_unread: bool) {
        let newer = self
            .last_message
            .as_ref()
            .map_or(true, |last| msg.created_at >= last.created_at);
        if newer {
            self.last_message = Some(LastMessage::from(msg));
        }
        if count_unread {
            self.unread_count = self.unread_count.saturating_add(1);
        }
    }

    pub fn clear_unread(&mut self) {
        self.unread_count = 0;
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM_JSON: &str = r#"{
        "id": 12,
        "name": "",
        "type": "CAR_INQUIRY",
        "relatedCar": {"id": 881, "title": "2019 Audi A4 Avant"},
        "lastMessage": {
            "content": "Can we book a test drive?",
            "senderUsername": "jonas",
            "messageType": "TEXT",
            "createdAt": "2024-05-02T09:30:00"
        },
        "unreadCount": 2
    }"#;

    #[test]
    fn test_deserialize_car_inquiry_room() {
        let room: ChatRoom = serde_json::from_str(ROOM_JSON).unwrap();
        assert_eq!(room.id, "12");
        assert_eq!(room.room_type, RoomType::CarInquiry);
        assert_eq!(room.display_name(), "2019 Audi A4 Avant");
        assert_eq!(room.unread_count, 2);
        assert_eq!(
            room.last_message.unwrap().sender_username.as_deref(),
            Some("jonas")
        );
    }

    #[test]
    fn test_unknown_room_type_rejected() {
        let json = r#"{"id": 1, "roomType": "BROADCAST"}"#;
        assert!(serde_json::from_str::<ChatRoom>(json).is_err());
    }

    #[test]
    fn test_record_message_and_clear() {
        let mut room: ChatRoom = serde_json::from_str(ROOM_JSON).unwrap();
        let msg: Message = serde_json::from_str(
            r#"{"id": 5, "chatRoomId": 12, "sender": {"username": "ana"},
                "content": "881", "messageType": "CAR_REFERENCE",
                "createdAt": "2024-05-02T10:00:00Z"}"#,
        )
        .unwrap();

        room.record_message(&msg, true);
        assert_eq!(room.unread_count, 3);
        let last = room.last_message.as_ref().unwrap();
        assert_eq!(last.content, "881");
        assert_eq!(last.preview(), "[car] 881");
        assert_eq!(last.message_type, MessageType::CarReference);

        room.clear_unread();
        assert_eq!(room.unread_count, 0);
    }

    #[test]
    fn test_record_older_message_keeps_snapshot() {
        let mut room: ChatRoom = serde_json::from_str(ROOM_JSON).unwrap();
        let old: Message = serde_json::from_str(
            r#"{"id": 1, "chatRoomId": 12, "sender": {"username": "ana"},
                "content": "hi", "createdAt": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        room.record_message(&old, false);
        assert_eq!(room.unread_count, 2);
        assert_eq!(
            room.last_message.unwrap().content,
            "Can we book a test drive?"
        );
    }
}
