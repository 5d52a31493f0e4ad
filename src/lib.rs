//! Client core for the AnimaGen animation generation service.
//!
//! A prompt goes in, the [`GenerationService`] drives it through the backend
//! gateway while progress streams in over the push channel, and the settled
//! result (video URL, JSON scene representation, generated code) lands in the
//! chat state the presentation layer renders from. Identity (guest or Google
//! sign-in) is resolved once per process and attached to every request.

pub mod models;
pub mod services;

pub use models::{
    Chat, ChatHistoryItem, ChatListItem, ChatMessage, GenerateResponse, User, CUSTOM_CODE_PROMPT,
    UNSAVED_CHAT_ID,
};
pub use services::api_service::{ApiClient, ApiError};
pub use services::auth_service::{CredentialProvider, GoogleClaims};
pub use services::generation_service::{AppState, GenerationService, Status};
pub use services::sse_service::SseService;
