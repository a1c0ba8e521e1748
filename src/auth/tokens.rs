//! Token storage and management

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds before expiry at which a token is treated as expired
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    /// Unix timestamp (seconds); `None` for tokens without a known lifetime
    pub expires_at: Option<i64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs
            .map(|secs| Utc::now().timestamp().saturating_add(secs.min(i64::MAX as u64) as i64));

        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now().timestamp() + EXPIRY_MARGIN_SECS >= exp,
            None => false,
        }
    }
}

/// Token store trait for different storage backends
pub trait TokenStore {
    fn get_access_token(&self) -> Option<StoredToken>;
    fn set_access_token(&mut self, token: String, expires_in: Option<u64>);
    fn clear_tokens(&mut self);
}
