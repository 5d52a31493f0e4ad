use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::api::{ChatHistoryItem, GenerateResponse};

/// A chat id of "0" means the backend has not assigned one yet; the authoritative
/// id arrives with the first successful generation and overwrites the sentinel.
pub const UNSAVED_CHAT_ID: &str = "0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Client-generated, time-based, unique within a chat.
    pub id: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    pub is_generating: bool,
    pub generation_progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_response: Option<GenerateResponse>,
}

impl ChatMessage {
    /// A freshly submitted prompt, waiting on the backend.
    pub fn pending(prompt: &str, conversation_id: &str) -> Self {
        Self {
            id: Utc::now().timestamp_millis().to_string(),
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
            is_generating: true,
            generation_progress: 0,
            conversation_id: Some(conversation_id.to_string()),
            api_response: None,
        }
    }

    pub fn completed(&self, response: GenerateResponse) -> Self {
        Self {
            is_generating: false,
            generation_progress: 100,
            api_response: Some(response),
            ..self.clone()
        }
    }

    pub fn failed(&self) -> Self {
        Self {
            is_generating: false,
            generation_progress: 0,
            api_response: None,
            ..self.clone()
        }
    }
}

impl From<ChatHistoryItem> for ChatMessage {
    fn from(item: ChatHistoryItem) -> Self {
        let timestamp = item
            .created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now());

        Self {
            id: item.id.to_string(),
            prompt: item.prompt.clone(),
            timestamp,
            is_generating: false,
            generation_progress: 100,
            conversation_id: None,
            api_response: Some(GenerateResponse {
                id: item.id,
                prompt: item.prompt,
                user_id: item.user_id,
                chat_id: item.chat_id,
                conversation_id: String::new(),
                json_representation: item.json_representation,
                generated_code: String::new(),
                video_source: item.video_source,
                created_at: item.created_at,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_video_url: Option<String>,
}

impl Chat {
    pub fn new_unsaved(title: &str) -> Self {
        Self {
            id: UNSAVED_CHAT_ID.to_string(),
            title: title.to_string(),
            messages: Vec::new(),
            last_updated: Utc::now(),
            latest_video_url: None,
        }
    }

    pub fn latest_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Replace a message in place by id, keeping insertion order.
    pub fn replace_message(&mut self, updated: ChatMessage) {
        if let Some(slot) = self.messages.iter_mut().find(|m| m.id == updated.id) {
            *slot = updated;
        }
        self.last_updated = Utc::now();
    }
}
