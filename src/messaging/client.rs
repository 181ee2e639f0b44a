// src/messaging/client.rs
//! Messaging endpoints. List reads degrade to empty; writes propagate.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::error::ApiResult;
use crate::core::service_client::ServiceClient;
use crate::types::{ConversationHandle, ConversationSummary, Message, SendMessageRequest};
use crate::utils::{clamp_page_limit, normalize_content, validate_id};

const CONVERSATIONS_ENDPOINT: &str = "/messaging/conversations";
const MESSAGES_ENDPOINT: &str = "/messaging/messages";

#[derive(Clone)]
pub struct MessagingClient {
    client: ServiceClient,
}

impl MessagingClient {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    pub fn service(&self) -> &ServiceClient {
        &self.client
    }

    pub async fn try_list_conversations(&self, token: &str) -> ApiResult<Vec<ConversationSummary>> {
        self.client.get(CONVERSATIONS_ENDPOINT, Some(token)).await
    }

    /// Conversations for the signed-in user, most recent first. Empty on any failure.
    pub async fn list_conversations(&self, token: &str) -> Vec<ConversationSummary> {
        match self.try_list_conversations(token).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!("Failed to list conversations: {}", e);
                Vec::new()
            }
        }
    }

    /// Existing conversation with `other_user_id`, created on first use.
    pub async fn get_or_create_conversation(
        &self,
        other_user_id: &str,
        token: &str,
    ) -> ApiResult<ConversationHandle> {
        let other_user_id = validate_id("user", other_user_id)?;
        let path = format!("{}/with/{}", CONVERSATIONS_ENDPOINT, other_user_id);
        self.client.get(&path, Some(token)).await
    }

    pub async fn try_list_messages(
        &self,
        conversation_id: &str,
        token: &str,
        before: Option<&str>,
        limit: u32,
    ) -> ApiResult<Vec<Message>> {
        let conversation_id = validate_id("conversation", conversation_id)?;
        let mut path = format!(
            "{}/{}/messages?limit={}",
            CONVERSATIONS_ENDPOINT,
            conversation_id,
            clamp_page_limit(limit)
        );
        if let Some(before) = before {
            let before = validate_id("message", before)?;
            path.push_str(&format!("&before={}", before));
        }
        self.client.get(&path, Some(token)).await
    }

    /// One page of history, oldest first. Empty on any failure.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
        token: &str,
        before: Option<&str>,
        limit: u32,
    ) -> Vec<Message> {
        match self
            .try_list_messages(conversation_id, token, before, limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Failed to list messages for {}: {}", conversation_id, e);
                Vec::new()
            }
        }
    }

    /// Invalid content or ids are rejected before any request is made.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        token: &str,
    ) -> ApiResult<Message> {
        let content = normalize_content(content)?;
        let conversation_id = validate_id("conversation", conversation_id)?;
        let path = format!("{}/{}/messages", CONVERSATIONS_ENDPOINT, conversation_id);
        self.client
            .post(&path, &SendMessageRequest { content: &content }, Some(token))
            .await
    }

    /// Failures are logged and swallowed; unread badges catch up on the next poll.
    pub async fn mark_read(&self, message_id: &str, token: &str) {
        let result = match validate_id("message", message_id) {
            Ok(id) => {
                let path = format!("{}/{}/read", MESSAGES_ENDPOINT, id);
                self.client
                    .patch::<_, serde_json::Value>(&path, &serde_json::json!({}), Some(token))
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!("Marked message {} read", message_id),
            Err(e) => warn!("Failed to mark message {} read: {}", message_id, e),
        }
    }

    pub fn spawn_mark_read(&self, message_id: String, token: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.mark_read(&message_id, &token).await })
    }
}
