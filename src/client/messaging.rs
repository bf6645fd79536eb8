use log::debug;

use super::{now_ms, ChatClient};
use crate::error::ChatError;
use crate::models::{Conversation, Message};
use crate::realtime::StoreError;

impl ChatClient {
    /// Append a message to a conversation. Nothing is retried on failure.
    pub fn send_message(&self, conversation: &Conversation, text: &str) -> Result<Message, ChatError> {
        let message = Message::new(text, &self.uid, now_ms())?;
        let path = format!("{}/{}", conversation.messages_path(), self.store.push_key());
        let value = serde_json::to_value(&message).map_err(StoreError::from)?;
        self.store.write(&path, Some(value))?;
        debug!("Sent message to {}", path);
        Ok(message)
    }
}
