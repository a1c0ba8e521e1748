//! Ordered, de-duplicated message list for one conversation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::models::{DeliveryStatus, Message};

/// Ordering key: creation time, ties broken by id.
type OrderKey = (DateTime<Utc>, String);

fn order_key(msg: &Message) -> OrderKey {
    (msg.created_at, msg.id.clone())
}

/// Messages of a single conversation, oldest first.
///
/// Keyed by message id, so a message that arrives twice (live echo and a
/// later history fetch) is stored once. The newer copy wins.
#[derive(Debug)]
pub struct MessageStore {
    owner: String,
    ordered: BTreeMap<OrderKey, Message>,
    by_id: HashMap<String, OrderKey>,
}

impl MessageStore {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            owner: conversation_id.to_string(),
            ordered: BTreeMap::new(),
            by_id: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.by_id.get(message_id).and_then(|k| self.ordered.get(k))
    }

    /// Messages oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.ordered.values()
    }

    /// Insert or replace by id. Returns true if the id was new.
    fn upsert(&mut self, msg: Message) -> bool {
        let key = order_key(&msg);
        let previous = self.by_id.insert(msg.id.clone(), key.clone());
        if let Some(ref old_key) = previous {
            self.ordered.remove(old_key);
        }
        self.ordered.insert(key, msg);
        previous.is_none()
    }

    /// Replace the store with the first history page (`newest_first` as
    /// returned by the server).
    ///
    /// Messages already held that are newer than everything in the page
    /// are kept: they arrived over the live feed after the server built
    /// the page. An empty page keeps everything held. Foreign messages in
    /// the page are skipped.
    pub fn replace_history(&mut self, newest_first: Vec<Message>) -> usize {
        let newest_in_page = newest_first
            .iter()
            .filter(|m| m.conversation_id == self.owner)
            .map(|m| m.created_at)
            .max();

        let keep: Vec<Message> = match newest_in_page {
            Some(cutoff) => self
                .ordered
                .values()
                .filter(|m| m.created_at > cutoff)
                .cloned()
                .collect(),
            None => self.ordered.values().cloned().collect(),
        };

        self.ordered.clear();
        self.by_id.clear();

        let added = self.merge_page(newest_first);
        for msg in keep {
            self.upsert(msg);
        }
        added
    }

    /// Merge an older history page in front of what is held.
    ///
    /// Returns how many messages were new to the store.
    pub fn prepend_history(&mut self, newest_first: Vec<Message>) -> usize {
        self.merge_page(newest_first)
    }

    fn merge_page(&mut self, newest_first: Vec<Message>) -> usize {
        let mut added = 0;
        for msg in newest_first.into_iter().rev() {
            if msg.conversation_id != self.owner {
                tracing::warn!(
                    "History for {} contained message {} of conversation {}, skipped",
                    self.owner,
                    msg.id,
                    msg.conversation_id
                );
                continue;
            }
            if self.upsert(msg) {
                added += 1;
            }
        }
        added
    }

    /// Insert a pushed message. Messages of other conversations are ignored.
    ///
    /// Returns true if the message was new to the store.
    pub fn append_live(&mut self, msg: Message) -> bool {
        if msg.conversation_id != self.owner {
            return false;
        }
        self.upsert(msg)
    }

    /// Apply a delivery status change. Returns false for unknown ids.
    ///
    /// Status only moves forward; a late `Delivered` after `Read` is ignored.
    pub fn update_status(&mut self, message_id: &str, status: DeliveryStatus) -> bool {
        let Some(key) = self.by_id.get(message_id) else {
            return false;
        };
        match self.ordered.get_mut(key) {
            Some(msg) if status > msg.status => {
                msg.status = status;
                true
            }
            _ => false,
        }
    }
}
