//! Common types used throughout Courier.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a queued message.
///
/// Either supplied by the producer or generated at enqueue time. The
/// remote side is expected to deduplicate on this value, since delivery
/// is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Create a new MessageId from a string.
    ///
    /// # Preconditions
    /// - `id` must be non-empty after trimming
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "MessageId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_message_id_creation() {
        let id = MessageId::new("msg-1").unwrap();
        assert_eq!(id.as_str(), "msg-1");
    }

    #[test]
    fn test_message_id_trims() {
        let id = MessageId::new("  msg-1 ").unwrap();
        assert_eq!(id.as_str(), "msg-1");
    }

    #[test]
    fn test_message_id_empty_fails() {
        assert!(MessageId::new("").is_err());
        assert!(MessageId::new("   ").is_err());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn test_empty_id_rejected_on_deserialize() {
        let result: std::result::Result<MessageId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_surrounding_whitespace_is_ignored(raw in "[a-zA-Z0-9_-]{1,64}", pad in " {0,4}") {
            let padded = MessageId::new(format!("{pad}{raw}{pad}")).unwrap();
            prop_assert_eq!(padded, MessageId::new(raw).unwrap());
        }
    }
}
