use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::models::{
    ChatHistoryItem, ChatListItem, CustomCodeRequest, GenerateRequest, GenerateResponse, User,
    CUSTOM_CODE_PROMPT,
};
use super::auth_service::{self, GoogleClaims};

/// Failure taxonomy for every backend operation. Transport-level connect
/// failures get their own variant so the UI can suggest checking the
/// connection; everything else keeps the backend's own words.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: Unable to connect to server. Please check your connection.")]
    Network,
    #[error("API request failed: {status}. {body}")]
    Http { status: StatusCode, body: String },
    #[error("{0}")]
    Malformed(&'static str),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to parse response: {0}")]
    Decode(String),
}

fn map_transport(e: reqwest::Error) -> ApiError {
    if e.is_connect() {
        ApiError::Network
    } else {
        ApiError::Request(e.to_string())
    }
}

/// Lenient second-tier mapping: once the `diagram` payload is confirmed
/// present, individual missing fields are defaulted rather than fatal.
pub fn diagram_to_response(diagram: &Value, conversation_id: &str) -> GenerateResponse {
    let string_or_empty = |field: &str| -> String {
        match diagram.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    let json_representation = match diagram.get("jsonRepresentation") {
        Some(Value::String(s)) => s.clone(),
        _ => "{}".to_string(),
    };

    let created_at = match diagram.get("createdAt") {
        Some(Value::String(s)) => s.clone(),
        _ => Utc::now().to_rfc3339(),
    };

    GenerateResponse {
        id: diagram.get("id").and_then(Value::as_i64).unwrap_or(0),
        prompt: string_or_empty("prompt"),
        user_id: string_or_empty("userId"),
        chat_id: diagram.get("chatId").and_then(Value::as_i64).unwrap_or(0),
        conversation_id: conversation_id.to_string(),
        json_representation,
        generated_code: string_or_empty("generatedCode"),
        video_source: string_or_empty("videoSource"),
        created_at,
    }
}

/// Strict first tier: a 200 body must carry `success: true` and a nested
/// `diagram` object, otherwise the whole operation fails.
pub fn parse_generate_body(body: &Value, conversation_id: &str) -> Result<GenerateResponse, ApiError> {
    if !body.get("success").and_then(Value::as_bool).unwrap_or(false) {
        return Err(ApiError::Malformed("Invalid response from server"));
    }

    let diagram = body
        .get("diagram")
        .filter(|d| !d.is_null())
        .ok_or(ApiError::Malformed("No diagram data in response"))?;

    Ok(diagram_to_response(diagram, conversation_id))
}

#[derive(Debug, Clone)]
pub struct AuthExchange {
    pub user_id: String,
    pub token: String,
}

/// Typed wrapper over the AnimaGen backend HTTP contract.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minute timeout for long generations
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config() -> Result<Self, String> {
        let base_url = super::config_service::get_base_url()?;
        Ok(Self::new(&base_url))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_generate(
        &self,
        body: &impl serde::Serialize,
        user: Option<&User>,
        conversation_id: &str,
    ) -> Result<GenerateResponse, ApiError> {
        let response = self
            .client
            .post(format!("{}/api/diagrams/generate", self.base_url))
            .headers(auth_service::auth_headers(user))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        parse_generate_body(&body, conversation_id)
    }

    /// Submit a prompt for animation generation.
    pub async fn generate_animation(
        &self,
        prompt: &str,
        user: Option<&User>,
        chat_id: i64,
        conversation_id: &str,
    ) -> Result<GenerateResponse, ApiError> {
        let request = GenerateRequest {
            prompt: prompt.to_string(),
            chat_id,
            conversation_id: conversation_id.to_string(),
        };

        self.post_generate(&request, user, conversation_id).await
    }

    /// Execute user-edited scene code directly, skipping AI inference. The
    /// sentinel prompt stands in for the code so it never lands in history.
    pub async fn run_custom_code(
        &self,
        code: &str,
        user: Option<&User>,
        chat_id: i64,
        conversation_id: &str,
    ) -> Result<GenerateResponse, ApiError> {
        let request = CustomCodeRequest {
            prompt: CUSTOM_CODE_PROMPT.to_string(),
            custom_code: code.to_string(),
            skip_llm_response: true,
            chat_id,
            conversation_id: conversation_id.to_string(),
        };

        self.post_generate(&request, user, conversation_id).await
    }

    /// Fetch the chat-list projection. A non-array body is treated as an
    /// empty list rather than an error.
    pub async fn get_all_chats(&self, user: Option<&User>) -> Result<Vec<ChatListItem>, ApiError> {
        let body = self
            .get_json(
                format!("{}/api/chats/get-all-chats-of-user", self.base_url),
                user,
            )
            .await?;

        match body {
            Value::Array(_) => {
                serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
            }
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_chat_history(
        &self,
        user: Option<&User>,
        chat_id: i64,
    ) -> Result<Vec<ChatHistoryItem>, ApiError> {
        let body = self
            .get_json(
                format!(
                    "{}/api/chats/get-chat-history?chatId={}",
                    self.base_url, chat_id
                ),
                user,
            )
            .await?;

        match body {
            Value::Array(_) => {
                serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
            }
            _ => Ok(Vec::new()),
        }
    }

    pub async fn delete_chat(&self, user: Option<&User>, chat_id: i64) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(format!(
                "{}/api/chats/delete-chats?chatId={}",
                self.base_url, chat_id
            ))
            .headers(auth_service::auth_headers(user))
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }

        Ok(())
    }

    /// Exchange a Google credential (plus any existing guest id, so the
    /// backend can migrate guest chats) for a backend-issued token.
    pub async fn google_authorize(
        &self,
        credential: &str,
        claims: &GoogleClaims,
        guest_id: Option<&str>,
        user: Option<&User>,
    ) -> Result<AuthExchange, ApiError> {
        let mut request = serde_json::json!({
            "googleToken": credential,
            "userInfo": {
                "id": claims.sub,
                "name": claims.name,
                "email": claims.email,
                "picture": claims.picture,
            },
        });
        if let Some(guest_id) = guest_id {
            request["guestId"] = Value::String(guest_id.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/auth/google-authorize", self.base_url))
            .headers(auth_service::auth_headers(user))
            .json(&request)
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        // userId arrives as a number or a string depending on backend version
        let user_id = match body.get("userId") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(ApiError::Malformed("Invalid response from server")),
        };
        let token = body
            .get("token")
            .and_then(Value::as_str)
            .ok_or(ApiError::Malformed("Invalid response from server"))?
            .to_string();

        Ok(AuthExchange { user_id, token })
    }

    async fn get_json(&self, url: String, user: Option<&User>) -> Result<Value, ApiError> {
        let response = self
            .client
            .get(url)
            .headers(auth_service::auth_headers(user))
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}
