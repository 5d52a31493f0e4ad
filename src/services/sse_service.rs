use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Layered payload fallback: a `{data: string}` envelope is unwrapped, a bare
/// JSON string is unquoted, and anything else is delivered verbatim. Every
/// event reaches the listener in some form.
pub fn extract_payload(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => match map.get("data") {
            Some(Value::String(payload)) => payload.clone(),
            _ => raw.to_string(),
        },
        Ok(Value::String(payload)) => payload,
        _ => raw.to_string(),
    }
}

/// Incremental server-sent-events frame parser. Feed it raw bytes; complete
/// events come out as their joined data payloads.
#[derive(Default)]
pub struct EventStreamParser {
    buffer: String,
    data_lines: Vec<String>,
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    events.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data_lines.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // event:/id:/retry: fields and comment lines are ignored
        }

        events
    }
}

struct SseSubscription {
    task: JoinHandle<()>,
}

/// Per-conversation progress stream manager. Each subscribed conversation id
/// owns its own connection with an independent lifecycle, so subscriptions for
/// different conversations never tear each other down.
pub struct SseService {
    base_url: String,
    client: reqwest::Client,
    subscriptions: Mutex<HashMap<String, SseSubscription>>,
}

impl SseService {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a progress stream for `conversation_id` and hand each message to
    /// `on_message`. Connection failures are logged, never surfaced: the push
    /// channel is an enhancement, the HTTP response stays the source of truth.
    /// Subscribing again for the same id replaces that id's connection.
    pub fn subscribe(&self, conversation_id: &str, on_message: MessageCallback) {
        let url = format!(
            "{}/render/stream?conversationId={}",
            self.base_url,
            urlencoding::encode(conversation_id)
        );
        let client = self.client.clone();
        let id = conversation_id.to_string();

        let task = tokio::spawn(async move {
            let response = match client
                .get(&url)
                .header("Accept", "text/event-stream")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "SSE connection failed");
                    return;
                }
            };

            if !response.status().is_success() {
                tracing::warn!(
                    conversation_id = %id,
                    status = %response.status(),
                    "SSE stream rejected"
                );
                return;
            }

            tracing::debug!(conversation_id = %id, "SSE connection opened");

            let mut stream = response.bytes_stream();
            let mut parser = EventStreamParser::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        // dropped connection: stop reading, no callback
                        tracing::warn!(conversation_id = %id, error = %e, "SSE stream error");
                        return;
                    }
                };

                for event in parser.feed(&chunk) {
                    on_message(extract_payload(&event));
                }
            }
        });

        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = subscriptions.insert(conversation_id.to_string(), SseSubscription { task }) {
            previous.task.abort();
        }
    }

    /// Close the stream for `conversation_id`. A no-op when it was never
    /// subscribed.
    pub fn unsubscribe(&self, conversation_id: &str) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(subscription) = subscriptions.remove(conversation_id) {
            subscription.task.abort();
        }
    }

    /// Close every live stream and drop all registrations.
    pub fn disconnect(&self) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        for (_, subscription) in subscriptions.drain() {
            subscription.task.abort();
        }
    }

    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(conversation_id)
    }
}

impl Drop for SseService {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_payload_is_unwrapped() {
        assert_eq!(extract_payload(r#"{"data":"rendering frame 3"}"#), "rendering frame 3");
    }

    #[test]
    fn bare_json_string_is_unquoted() {
        assert_eq!(extract_payload(r#""compiling scene""#), "compiling scene");
    }

    #[test]
    fn plain_text_is_delivered_verbatim() {
        assert_eq!(extract_payload("45% done"), "45% done");
    }

    #[test]
    fn envelope_without_string_data_falls_back_to_raw() {
        assert_eq!(extract_payload(r#"{"status":5}"#), r#"{"status":5}"#);
    }

    #[test]
    fn parser_assembles_multi_line_events() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"data: first\n").is_empty());
        let events = parser.feed(b"data: second\n\n");
        assert_eq!(events, vec!["first\nsecond".to_string()]);
    }

    #[test]
    fn parser_handles_split_chunks_and_crlf() {
        let mut parser = EventStreamParser::new();
        assert!(parser.feed(b"data: hel").is_empty());
        let events = parser.feed(b"lo\r\n\r\n");
        assert_eq!(events, vec!["hello".to_string()]);
    }

    #[test]
    fn comments_and_other_fields_are_ignored() {
        let mut parser = EventStreamParser::new();
        let events = parser.feed(b": keepalive\nevent: progress\ndata: ok\n\n");
        assert_eq!(events, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_unknown_conversation_is_a_no_op() {
        let service = SseService::new("http://localhost:0");
        service.unsubscribe("never-subscribed");
        assert!(!service.is_subscribed("never-subscribed"));
    }

    #[tokio::test]
    async fn subscriptions_are_tracked_per_conversation() {
        let service = SseService::new("http://localhost:0");
        service.subscribe("a", Arc::new(|_| {}));
        service.subscribe("b", Arc::new(|_| {}));
        assert!(service.is_subscribed("a"));
        assert!(service.is_subscribed("b"));

        service.unsubscribe("a");
        assert!(!service.is_subscribed("a"));
        assert!(service.is_subscribed("b"));

        service.disconnect();
        assert!(!service.is_subscribed("b"));
    }
}
