//! Room list kept current from live events.

use std::collections::HashSet;

use crate::live::LiveEvent;
use crate::models::{ChatRoom, UserIdentity};

/// Chat rooms sorted by last activity, newest first.
///
/// Unread counters are an optimistic local reflection of server state:
/// incoming messages from other users bump them, focusing a room clears it.
pub struct Inbox {
    rooms: Vec<ChatRoom>,
    focused: Option<String>,
    identity: Option<UserIdentity>,
    /// Message ids already applied; the feed may redeliver after a reconnect
    seen: HashSet<String>,
}

impl Inbox {
    pub fn new(rooms: Vec<ChatRoom>, identity: Option<UserIdentity>) -> Self {
        let mut inbox = Self {
            rooms,
            focused: None,
            identity,
            seen: HashSet::new(),
        };
        inbox.sort();
        inbox
    }

    fn sort(&mut self) {
        self.rooms
            .sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
    }

    pub fn rooms(&self) -> &[ChatRoom] {
        &self.rooms
    }

    pub fn get(&self, room_id: &str) -> Option<&ChatRoom> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.rooms.iter().map(|r| r.unread_count).sum()
    }

    /// Focus a room: clear its unread counter and stop counting for it.
    ///
    /// Returns false if the room is unknown; the previous focus is kept.
    pub fn focus(&mut self, room_id: &str) -> bool {
        let Some(room) = self.rooms.iter_mut().find(|r| r.id == room_id) else {
            return false;
        };
        room.clear_unread();
        self.focused = Some(room_id.to_string());
        true
    }

    /// Apply a live event. Returns true if a known room was updated.
    ///
    /// A message id that was already applied is ignored.
    pub fn apply(&mut self, event: &LiveEvent) -> bool {
        let LiveEvent::Message {
            conversation_id,
            data,
        } = event
        else {
            return false;
        };

        let own = self.identity.as_ref().is_some_and(|me| me.is_own(data));
        let count_unread = !own && self.focused.as_deref() != Some(conversation_id.as_str());

        let Some(room) = self.rooms.iter_mut().find(|r| r.id == *conversation_id) else {
            tracing::debug!("Message for unknown room {}", conversation_id);
            return false;
        };
        if !self.seen.insert(data.id.clone()) {
            tracing::debug!("Message {} already applied", data.id);
            return false;
        }
        room.record_message(data, count_unread);

        self.sort();
        true
    }
}
