use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{Chat, ChatListItem, ChatMessage, GenerateResponse, User, CUSTOM_CODE_PROMPT};
use super::api_service::ApiClient;
use super::auth_service::{self, CredentialProvider};
use super::sse_service::SseService;

const STATUS_RESET_SUCCESS: Duration = Duration::from_secs(3);
const STATUS_RESET_ERROR: Duration = Duration::from_secs(5);

/// Transient banner state. Success and error variants dissolve back to idle on
/// their own after a short delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Generating,
    Success,
    Error,
}

/// Everything the presentation layer reads. Mutated only by the service;
/// consumers take snapshots.
#[derive(Debug, Clone)]
pub struct AppState {
    pub user: Option<User>,
    pub current_chat: Option<Chat>,
    pub current_chat_id: Option<i64>,
    pub chats: Vec<ChatListItem>,
    pub status: Status,
    pub error: Option<String>,
    /// Live progress text from the push channel, cleared between submissions.
    pub current_message: String,
    pub selected_video_url: Option<String>,
    pub is_generating: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            user: None,
            current_chat: None,
            current_chat_id: None,
            chats: Vec::new(),
            status: Status::Idle,
            error: None,
            current_message: String::new(),
            selected_video_url: None,
            is_generating: false,
        }
    }
}

/// Chat title derived from the first prompt: the first six words, with an
/// ellipsis when the prompt goes on longer.
pub fn chat_title(prompt: &str) -> String {
    let words: Vec<&str> = prompt.split(' ').collect();
    let mut title = words.iter().take(6).copied().collect::<Vec<_>>().join(" ");
    if words.len() > 6 {
        title.push_str("...");
    }
    title
}

/// Lenient reconciliation of a confirmed generation payload: missing fields
/// fall back to what was submitted locally rather than failing the exchange.
fn normalize_response(
    mut response: GenerateResponse,
    prompt: &str,
    chat_id: i64,
    conversation_id: &str,
) -> GenerateResponse {
    if response.prompt.is_empty() {
        response.prompt = prompt.to_string();
    }
    if response.chat_id == 0 {
        response.chat_id = chat_id;
    }
    if response.conversation_id.is_empty() {
        response.conversation_id = conversation_id.to_string();
    }
    if response.json_representation.is_empty() {
        response.json_representation = "{}".to_string();
    }
    if response.created_at.is_empty() {
        response.created_at = Utc::now().to_rfc3339();
    }
    response
}

enum Submission {
    Prompt(String),
    CustomCode(String),
}

impl Submission {
    /// What gets recorded on the exchange. Custom code is never echoed into
    /// history; only the sentinel prompt is.
    fn recorded_prompt(&self) -> &str {
        match self {
            Submission::Prompt(prompt) => prompt,
            Submission::CustomCode(_) => CUSTOM_CODE_PROMPT,
        }
    }
}

/// Drives one prompt submission from user intent to settled state and owns
/// the in-memory conversation/view state the UI renders from.
pub struct GenerationService {
    api: ApiClient,
    sse: SseService,
    state: Arc<Mutex<AppState>>,
    status_reset: Mutex<Option<JoinHandle<()>>>,
}

impl GenerationService {
    pub fn new(api: ApiClient, sse: SseService) -> Self {
        Self {
            api,
            sse,
            state: Arc::new(Mutex::new(AppState::default())),
            status_reset: Mutex::new(None),
        }
    }

    pub fn from_config() -> Result<Self, String> {
        let api = ApiClient::from_config()?;
        let sse = SseService::new(api.base_url());
        Ok(Self::new(api, sse))
    }

    fn lock_state(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> AppState {
        self.lock_state().clone()
    }

    /// Resolve the local identity, set up the credential provider (non-fatal
    /// when it fails) and pull the initial chat list.
    pub async fn initialize(&self, provider: &dyn CredentialProvider) {
        let user = auth_service::resolve_or_create();
        self.lock_state().user = Some(user);

        match super::config_service::get_google_client_id() {
            Ok(Some(client_id)) => {
                if let Err(e) = provider.initialize(&client_id) {
                    tracing::warn!(error = %e, "Google auth initialization failed");
                }
            }
            Ok(None) => tracing::debug!("No Google client id configured, staying in guest mode"),
            Err(e) => tracing::warn!(error = %e, "Failed to read auth configuration"),
        }

        if let Err(e) = self.load_chats().await {
            tracing::warn!(error = %e, "Failed to load chats");
        }
    }

    /// Submit a prompt for generation. A no-op while another generation is in
    /// flight; concurrent submissions are rejected, not queued.
    pub async fn submit_prompt(&self, prompt: &str) {
        self.run_submission(Submission::Prompt(prompt.to_string()))
            .await;
    }

    /// Re-run the edited scene code through the identical submission state
    /// machine. The exchange records the sentinel prompt, never the code.
    pub async fn run_custom_code(&self, code: &str) {
        self.run_submission(Submission::CustomCode(code.to_string()))
            .await;
    }

    /// Re-submit the most recent prompt of the active chat. A no-op while
    /// generating or when there is nothing to regenerate.
    pub async fn regenerate(&self) {
        let prompt = {
            let state = self.lock_state();
            if state.is_generating {
                return;
            }
            state
                .current_chat
                .as_ref()
                .and_then(|chat| chat.latest_message())
                .map(|message| message.prompt.clone())
        };

        if let Some(prompt) = prompt {
            self.submit_prompt(&prompt).await;
        }
    }

    async fn run_submission(&self, submission: Submission) {
        let conversation_id = Uuid::new_v4().to_string();
        let recorded_prompt = submission.recorded_prompt().to_string();

        let (pending, chat_id, user) = {
            let mut state = self.lock_state();
            if state.is_generating {
                return;
            }

            if state.current_chat.is_none() {
                state.current_chat = Some(Chat::new_unsaved(&chat_title(&recorded_prompt)));
                state.current_chat_id = Some(0);
            }

            let pending = ChatMessage::pending(&recorded_prompt, &conversation_id);
            if let Some(chat) = state.current_chat.as_mut() {
                chat.messages.push(pending.clone());
                chat.last_updated = Utc::now();
            }

            let chat_id = state.current_chat_id.unwrap_or(0);

            // A new run must never show the previous run's video.
            state.selected_video_url = None;
            state.is_generating = true;
            state.status = Status::Generating;
            state.error = None;
            state.current_message.clear();

            (pending, chat_id, state.user.clone())
        };

        self.cancel_status_reset();

        // Progress messages only ever touch the live status text, never the
        // exchange, so a stray late message cannot corrupt a settled result.
        let state_for_messages = Arc::clone(&self.state);
        self.sse.subscribe(
            &conversation_id,
            Arc::new(move |message| {
                let mut state = state_for_messages.lock().unwrap_or_else(|e| e.into_inner());
                state.current_message = message;
            }),
        );

        let result = match &submission {
            Submission::Prompt(prompt) => {
                self.api
                    .generate_animation(prompt, user.as_ref(), chat_id, &conversation_id)
                    .await
            }
            Submission::CustomCode(code) => {
                self.api
                    .run_custom_code(code, user.as_ref(), chat_id, &conversation_id)
                    .await
            }
        };

        match result {
            Ok(response) => {
                let validated =
                    normalize_response(response, &recorded_prompt, chat_id, &conversation_id);

                let mut state = self.lock_state();
                if let Some(chat) = state.current_chat.as_mut() {
                    chat.replace_message(pending.completed(validated.clone()));
                    // The backend-assigned chat id is authoritative from here on.
                    chat.id = validated.chat_id.to_string();
                    chat.latest_video_url = if validated.video_source.is_empty() {
                        None
                    } else {
                        Some(validated.video_source.clone())
                    };
                }
                state.current_chat_id = Some(validated.chat_id);
                if !validated.video_source.is_empty() {
                    state.selected_video_url = Some(validated.video_source.clone());
                }
                state.is_generating = false;
                state.status = Status::Success;
                state.current_message.clear();
                drop(state);

                self.sse.unsubscribe(&conversation_id);
                self.refresh_chats_background();
                self.schedule_status_reset(STATUS_RESET_SUCCESS, false);
            }
            Err(e) => {
                let error_message = e.to_string();
                tracing::warn!(error = %error_message, "Generation failed");

                let mut state = self.lock_state();
                if let Some(chat) = state.current_chat.as_mut() {
                    chat.replace_message(pending.failed());
                }
                state.is_generating = false;
                state.status = Status::Error;
                state.error = Some(error_message);
                state.current_message.clear();
                drop(state);

                self.sse.unsubscribe(&conversation_id);
                self.refresh_chats_background();
                self.schedule_status_reset(STATUS_RESET_ERROR, true);
            }
        }
    }

    /// Refresh the chat-list projection for the active identity.
    pub async fn load_chats(&self) -> Result<(), String> {
        let user = self.lock_state().user.clone();
        let chats = self
            .api
            .get_all_chats(user.as_ref())
            .await
            .map_err(|e| e.to_string())?;
        self.lock_state().chats = chats;
        Ok(())
    }

    fn refresh_chats_background(&self) {
        let api = self.api.clone();
        let state = Arc::clone(&self.state);
        let user = self.lock_state().user.clone();

        tokio::spawn(async move {
            match api.get_all_chats(user.as_ref()).await {
                Ok(chats) => {
                    state.lock().unwrap_or_else(|e| e.into_inner()).chats = chats;
                }
                Err(e) => tracing::warn!(error = %e, "Failed to refresh chat list"),
            }
        });
    }

    /// Load a saved chat's history and make it the active conversation,
    /// pointing the preview at its most recent video.
    pub async fn select_chat(&self, chat_id: i64) -> Result<(), String> {
        let user = self.lock_state().user.clone();
        let history = self
            .api
            .get_chat_history(user.as_ref(), chat_id)
            .await
            .map_err(|e| e.to_string())?;

        let messages: Vec<ChatMessage> = history.into_iter().map(ChatMessage::from).collect();
        let latest_video_url = messages
            .last()
            .and_then(|m| m.api_response.as_ref())
            .map(|r| r.video_source.clone())
            .filter(|url| !url.is_empty());

        let mut state = self.lock_state();
        let title = state
            .chats
            .iter()
            .find(|c| c.id == chat_id)
            .map(|c| c.title.clone())
            .unwrap_or_else(|| "Chat".to_string());

        state.selected_video_url = latest_video_url.clone();
        state.current_chat = Some(Chat {
            id: chat_id.to_string(),
            title,
            messages,
            last_updated: Utc::now(),
            latest_video_url,
        });
        state.current_chat_id = Some(chat_id);

        Ok(())
    }

    /// Start over with an empty conversation.
    pub fn new_chat(&self) {
        let mut state = self.lock_state();
        state.current_chat = None;
        state.current_chat_id = None;
        state.selected_video_url = None;
        state.error = None;
        state.current_message.clear();
    }

    pub async fn delete_chat(&self, chat_id: i64) -> Result<(), String> {
        let user = self.lock_state().user.clone();
        self.api
            .delete_chat(user.as_ref(), chat_id)
            .await
            .map_err(|e| e.to_string())?;

        let mut state = self.lock_state();
        state.chats.retain(|c| c.id != chat_id);
        if state.current_chat_id == Some(chat_id) {
            state.current_chat = None;
            state.current_chat_id = None;
            state.selected_video_url = None;
        }

        Ok(())
    }

    pub fn select_video(&self, url: &str) {
        self.lock_state().selected_video_url = Some(url.to_string());
    }

    /// Run the federated sign-in handshake, then reload the chat list for the
    /// new identity and clear the previous user's conversation.
    pub async fn sign_in(&self, provider: &dyn CredentialProvider) -> Result<User, String> {
        let current = self.lock_state().user.clone();
        let user = auth_service::sign_in(provider, &self.api, current.as_ref())
            .await
            .map_err(|e| e.to_string())?;

        {
            let mut state = self.lock_state();
            state.user = Some(user.clone());
            state.current_chat = None;
            state.current_chat_id = None;
            state.selected_video_url = None;
        }

        if let Err(e) = self.load_chats().await {
            tracing::warn!(error = %e, "Failed to load chats after sign in");
        }

        Ok(user)
    }

    /// Drop the signed-in identity, fall back to a fresh guest and reload.
    pub async fn sign_out(&self, provider: &dyn CredentialProvider) {
        auth_service::sign_out(provider);
        let guest = auth_service::create_guest_user();

        {
            let mut state = self.lock_state();
            state.user = Some(guest);
            state.current_chat = None;
            state.current_chat_id = None;
            state.selected_video_url = None;
            state.chats.clear();
        }

        if let Err(e) = self.load_chats().await {
            tracing::warn!(error = %e, "Failed to load chats after sign out");
        }
    }

    /// Arm the auto-dismiss timer for the transient status banner. The timer
    /// is scoped to the submission: arming a new one aborts the stale one.
    fn schedule_status_reset(&self, delay: Duration, clear_error: bool) {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = Status::Idle;
            if clear_error {
                state.error = None;
            }
        });

        let mut slot = self.status_reset.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    fn cancel_status_reset(&self) {
        let mut slot = self.status_reset.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.take() {
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn unreachable_service() -> GenerationService {
        // Nothing listens on port 9; requests fail at the transport layer.
        let api = ApiClient::new("http://127.0.0.1:9");
        let sse = SseService::new("http://127.0.0.1:9");
        GenerationService::new(api, sse)
    }

    /// Minimal backend stand-in: answers every request on the socket with the
    /// same JSON body and closes. Returns the base URL to point clients at.
    async fn canned_backend(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        request.extend_from_slice(&buf[..n]);
                        if let Some(header_end) =
                            request.windows(4).position(|w| w == b"\r\n\r\n")
                        {
                            let headers = String::from_utf8_lossy(&request[..header_end]);
                            let content_length = headers
                                .lines()
                                .find_map(|line| {
                                    line.to_ascii_lowercase()
                                        .strip_prefix("content-length:")
                                        .and_then(|v| v.trim().parse::<usize>().ok())
                                })
                                .unwrap_or(0);
                            if request.len() >= header_end + 4 + content_length {
                                break;
                            }
                        }
                    }

                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn successful_submission_adopts_the_backend_chat_id() {
        let base_url = canned_backend(
            r#"{"success":true,"diagram":{"id":42,"chatId":777,"videoSource":"https://cdn/v.mp4"}}"#,
        )
        .await;
        let service =
            GenerationService::new(ApiClient::new(&base_url), SseService::new(&base_url));

        service.submit_prompt("draw a pendulum").await;

        let state = service.snapshot();
        assert!(!state.is_generating);
        assert_eq!(state.status, Status::Success);
        assert!(state.error.is_none());
        assert_eq!(state.current_chat_id, Some(777));
        assert_eq!(state.selected_video_url.as_deref(), Some("https://cdn/v.mp4"));

        let chat = state.current_chat.expect("chat was created");
        // The sentinel id gives way to the backend-assigned one.
        assert_eq!(chat.id, "777");
        assert_eq!(chat.latest_video_url.as_deref(), Some("https://cdn/v.mp4"));
        assert_eq!(chat.messages.len(), 1);

        let message = &chat.messages[0];
        assert!(!message.is_generating);
        assert_eq!(message.generation_progress, 100);
        let response = message.api_response.as_ref().expect("exchange completed");
        assert_eq!(response.id, 42);
        assert_eq!(response.chat_id, 777);
        // Fields the backend left out come back defaulted, not fatal.
        assert_eq!(response.prompt, "draw a pendulum");
        assert_eq!(response.generated_code, "");
        assert_eq!(response.json_representation, "{}");
        assert!(!response.created_at.is_empty());
    }

    #[test]
    fn short_prompts_title_verbatim() {
        assert_eq!(chat_title("spinning cube"), "spinning cube");
        assert_eq!(
            chat_title("one two three four five six"),
            "one two three four five six"
        );
    }

    #[test]
    fn long_prompts_truncate_to_six_words_with_ellipsis() {
        assert_eq!(
            chat_title("Draw a spinning cube, please make it blue and fast"),
            "Draw a spinning cube, please make..."
        );
    }

    #[test]
    fn normalize_fills_locally_known_fallbacks() {
        let response = GenerateResponse {
            id: 0,
            prompt: String::new(),
            user_id: String::new(),
            chat_id: 0,
            conversation_id: String::new(),
            json_representation: String::new(),
            generated_code: String::new(),
            video_source: String::new(),
            created_at: String::new(),
        };

        let normalized = normalize_response(response, "draw a sphere", 12, "conv-9");
        assert_eq!(normalized.prompt, "draw a sphere");
        assert_eq!(normalized.chat_id, 12);
        assert_eq!(normalized.conversation_id, "conv-9");
        assert_eq!(normalized.json_representation, "{}");
        assert!(!normalized.created_at.is_empty());
    }

    #[tokio::test]
    async fn first_submission_creates_one_unsaved_chat_with_one_exchange() {
        let service = unreachable_service();
        service
            .submit_prompt("Draw a spinning cube, please make it blue and fast")
            .await;

        let state = service.snapshot();
        let chat = state.current_chat.expect("chat was created");
        assert_eq!(chat.id, "0");
        assert_eq!(chat.title, "Draw a spinning cube, please make...");
        assert_eq!(chat.messages.len(), 1);
        assert!(state.selected_video_url.is_none());
    }

    #[tokio::test]
    async fn failed_submission_settles_the_exchange_and_surfaces_the_error() {
        let service = unreachable_service();
        service.submit_prompt("draw a cube").await;

        let state = service.snapshot();
        assert!(!state.is_generating);
        assert_eq!(state.status, Status::Error);
        assert!(state.error.is_some());
        assert!(state.current_message.is_empty());

        let message = state.current_chat.unwrap().messages.pop().unwrap();
        assert!(!message.is_generating);
        assert!(message.api_response.is_none());
        assert_eq!(message.generation_progress, 0);
    }

    #[tokio::test]
    async fn submissions_are_rejected_while_generating() {
        let service = unreachable_service();
        {
            let mut state = service.lock_state();
            state.current_chat = Some(Chat::new_unsaved("busy"));
            state.is_generating = true;
        }

        service.submit_prompt("another prompt").await;
        service.regenerate().await;

        let state = service.snapshot();
        assert!(state.current_chat.unwrap().messages.is_empty());
        assert!(state.is_generating);
    }

    #[tokio::test]
    async fn regenerate_without_messages_is_a_no_op() {
        let service = unreachable_service();
        service.regenerate().await;
        assert!(service.snapshot().current_chat.is_none());
    }

    #[tokio::test]
    async fn custom_code_records_the_sentinel_prompt_not_the_code() {
        let service = unreachable_service();
        service
            .run_custom_code("class Scene:\n    secret = 'do not log'")
            .await;

        let state = service.snapshot();
        let chat = state.current_chat.expect("chat was created");
        assert_eq!(chat.messages[0].prompt, CUSTOM_CODE_PROMPT);
    }

    #[tokio::test(start_paused = true)]
    async fn error_status_resets_to_idle_and_clears_the_message() {
        let service = unreachable_service();
        {
            let mut state = service.lock_state();
            state.status = Status::Error;
            state.error = Some("server overloaded".to_string());
        }

        service.schedule_status_reset(STATUS_RESET_ERROR, true);
        tokio::time::sleep(STATUS_RESET_ERROR + Duration::from_millis(100)).await;

        let state = service.snapshot();
        assert_eq!(state.status, Status::Idle);
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_reset_leaves_status_untouched() {
        let service = unreachable_service();
        service.lock_state().status = Status::Success;

        service.schedule_status_reset(STATUS_RESET_SUCCESS, false);
        service.cancel_status_reset();
        tokio::time::sleep(STATUS_RESET_SUCCESS + Duration::from_secs(1)).await;

        assert_eq!(service.snapshot().status, Status::Success);
    }

    #[tokio::test]
    async fn new_chat_clears_the_active_conversation() {
        let service = unreachable_service();
        {
            let mut state = service.lock_state();
            state.current_chat = Some(Chat::new_unsaved("old"));
            state.current_chat_id = Some(3);
            state.selected_video_url = Some("https://cdn/old.mp4".to_string());
            state.error = Some("stale".to_string());
        }

        service.new_chat();

        let state = service.snapshot();
        assert!(state.current_chat.is_none());
        assert!(state.current_chat_id.is_none());
        assert!(state.selected_video_url.is_none());
        assert!(state.error.is_none());
    }
}
