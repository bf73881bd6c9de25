//! Chat API client methods

use super::{ApiClient, ApiRequest, ClientError};
use crate::types::{Chat, Message, SendMessageRequest};

impl ApiClient {
    /// Chats owned by the current user
    pub async fn list_chats(&self) -> Result<Vec<Chat>, ClientError> {
        self.execute(ApiRequest::get("/chats")).await
    }

    /// Full message history of a chat
    pub async fn chat_messages(&self, chat_id: i64) -> Result<Vec<Message>, ClientError> {
        self.execute(ApiRequest::get(format!("/chats/{chat_id}/messages")))
            .await
    }

    /// Post a message to an existing chat and return the assistant's reply
    pub async fn send_message(
        &self,
        chat_id: i64,
        content: impl Into<String>,
    ) -> Result<Message, ClientError> {
        let req = ApiRequest::post(format!("/chats/{chat_id}/messages")).json(&SendMessageRequest {
            content: content.into(),
        })?;
        self.execute(req).await
    }

    /// Start a chat with its first message
    ///
    /// Returns the assistant's reply, which carries the id of the new chat.
    pub async fn start_chat(&self, content: impl Into<String>) -> Result<Message, ClientError> {
        let req = ApiRequest::post("/chats/messages").json(&SendMessageRequest {
            content: content.into(),
        })?;
        let message: Message = self.execute(req).await?;
        debug!(chat_id = message.chat_id, "Started chat");
        Ok(message)
    }

    /// Delete a chat and its messages
    pub async fn delete_chat(&self, chat_id: i64) -> Result<(), ClientError> {
        self.execute_unit(ApiRequest::delete(format!("/chats/{chat_id}")))
            .await
    }
}
