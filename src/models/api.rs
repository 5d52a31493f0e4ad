use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub prompt: String,
    pub chat_id: i64,
    pub conversation_id: String,
}

/// Prompt recorded for custom-code runs. The code itself travels in a separate
/// field and is never echoed into conversation history.
pub const CUSTOM_CODE_PROMPT: &str = "user custom code";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCodeRequest {
    pub prompt: String,
    pub custom_code: String,
    #[serde(rename = "skipllmResponse")]
    pub skip_llm_response: bool,
    pub chat_id: i64,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub id: i64,
    pub prompt: String,
    pub user_id: String,
    pub chat_id: i64,
    pub conversation_id: String,
    pub json_representation: String,
    pub generated_code: String,
    pub video_source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub id: i64,
    #[serde(default)]
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub starred: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryItem {
    pub id: i64,
    pub prompt: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub json_representation: String,
    #[serde(default)]
    pub video_source: String,
    #[serde(default)]
    pub created_at: String,
}
