//! User-related models

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::wire;

/// The logged-in user, used to tell own messages apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    #[serde(deserialize_with = "wire::string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserIdentity {
    /// Whether `msg` was written by this user.
    ///
    /// Matches on sender id when the payload carries one, else on username.
    pub fn is_own(&self, msg: &Message) -> bool {
        match msg.sender.id {
            Some(ref id) => *id == self.id,
            None => msg.sender.username == self.username,
        }
    }
}
