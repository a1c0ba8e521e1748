//! Conversation view errors

use thiserror::Error;

/// A history page could not be loaded. The store is left as it was.
#[derive(Debug, Error)]
#[error("failed to load page {page} of conversation {conversation_id}: {reason:#}")]
pub struct FetchError {
    pub conversation_id: String,
    pub page: u32,
    reason: anyhow::Error,
}

impl FetchError {
    pub fn new(conversation_id: &str, page: u32, reason: anyhow::Error) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            page,
            reason,
        }
    }
}

/// A message could not be sent. Nothing was added to the store.
#[derive(Debug, Error)]
#[error("failed to send message to conversation {conversation_id}: {reason:#}")]
pub struct SendError {
    pub conversation_id: String,
    reason: anyhow::Error,
}

impl SendError {
    pub fn new(conversation_id: &str, reason: anyhow::Error) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = FetchError::new(
            "12",
            3,
            anyhow::anyhow!("connection reset").context("GET /messages failed"),
        );
        assert_eq!(
            err.to_string(),
            "failed to load page 3 of conversation 12: GET /messages failed: connection reset"
        );

        let err = SendError::new("12", anyhow::anyhow!("HTTP 500"));
        assert_eq!(
            err.to_string(),
            "failed to send message to conversation 12: HTTP 500"
        );
    }
}
