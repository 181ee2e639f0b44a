// src/types/messaging.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id == user_id
    }
}

/// Row of the conversation list. Preview and unread count are computed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub other_user_id: String,
    #[serde(default)]
    pub other_name: String,
    #[serde(default)]
    pub other_role: String,
    #[serde(default, with = "timestamp::optional")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default, with = "timestamp::optional")]
    pub created_at: Option<DateTime<Utc>>,
}

/// What get-or-create returns and what a chat window is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHandle {
    pub id: String,
    pub other_user_id: String,
    #[serde(default)]
    pub other_name: String,
    #[serde(default)]
    pub other_role: String,
}

impl From<&ConversationSummary> for ConversationHandle {
    fn from(summary: &ConversationSummary) -> Self {
        Self {
            id: summary.id.clone(),
            other_user_id: summary.other_user_id.clone(),
            other_name: summary.other_name.clone(),
            other_role: summary.other_role.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_with_naive_timestamp() {
        let raw = r#"{
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "content": "Hello",
            "read": false,
            "created_at": "2025-03-01T09:30:00.5"
        }"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert!(message.created_at.is_some());
        assert!(message.is_from("u1"));
    }

    #[test]
    fn test_summary_tolerates_nulls() {
        let raw = r#"{
            "id": "c1",
            "other_user_id": "u2",
            "other_name": "Acme Corp",
            "other_role": "employer",
            "last_message_at": null,
            "last_message_preview": null,
            "unread_count": 0,
            "created_at": "2025-03-01T09:30:00+00:00"
        }"#;
        let summary: ConversationSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.last_message_at, None);
        let handle = ConversationHandle::from(&summary);
        assert_eq!(handle.other_name, "Acme Corp");
    }
}
