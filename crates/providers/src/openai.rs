use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, StreamChunk};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::backend::{CloudBackend, CloudReply, CloudRequest};
use crate::sse::{SseEvent, SseParser};

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> OpenAIRequest<'a> {
    fn from_request(req: &'a CloudRequest, stream: bool) -> Self {
        Self {
            model: &req.model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    /// Only present on the final chunk, and only with `include_usage`.
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    /// In-band failure reported after a 200 status.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    delta: OpenAIStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What a single SSE payload means for the reply being assembled.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Done,
    Delta {
        text: Option<String>,
        finish_reason: Option<String>,
        total_tokens: Option<u64>,
    },
    Failed(String),
    /// Unparseable payload (keep-alives, vendor extensions).
    Skip,
}

/// Human-readable text of an `error` object: its `message`, else the raw JSON.
fn error_text(error: &serde_json::Value) -> String {
    match error.get("message").and_then(|m| m.as_str()) {
        Some(msg) => msg.to_string(),
        None => error.to_string(),
    }
}

fn decode_stream_event(event: &SseEvent) -> StreamEvent {
    if event.is_done() {
        return StreamEvent::Done;
    }
    match serde_json::from_str::<OpenAIStreamResponse>(&event.data) {
        Ok(OpenAIStreamResponse {
            error: Some(error), ..
        }) => StreamEvent::Failed(format!("openai error: {}", error_text(&error))),
        Ok(resp) => {
            let choice = resp.choices.into_iter().next();
            let (text, finish_reason) = match choice {
                Some(c) => (c.delta.content.filter(|t| !t.is_empty()), c.finish_reason),
                None => (None, None),
            };
            StreamEvent::Delta {
                text,
                finish_reason,
                total_tokens: resp.usage.map(|u| u.total_tokens),
            }
        }
        Err(_) => StreamEvent::Skip,
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(800).collect();
    if detail.trim().is_empty() {
        return Err(anyhow!("openai error: {}", status));
    }
    Err(anyhow!("openai error: {}\n{}", status, detail))
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OpenAIClient {
    http: Client,
    auth_token: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            auth_token: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(&self, body: &OpenAIRequest<'_>) -> Result<Response> {
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;
        check_status(resp).await
    }
}

#[async_trait::async_trait]
impl CloudBackend for OpenAIClient {
    async fn complete(&self, request: &CloudRequest) -> Result<CloudReply> {
        let body = OpenAIRequest::from_request(request, false);
        let resp = self.post(&body).await?;
        let parsed: OpenAIResponse = resp.json().await?;
        if let Some(error) = &parsed.error {
            return Err(anyhow!("openai error: {}", error_text(error)));
        }
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(CloudReply {
            text,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }

    async fn stream(&self, request: &CloudRequest, tx: UnboundedSender<StreamChunk>) -> Result<()> {
        let body = OpenAIRequest::from_request(request, true);
        let resp = self.post(&body).await?;

        let mut parser = SseParser::new();
        let mut bytes = resp.bytes_stream();
        let mut stop_reason: Option<String> = None;

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&chunk) {
                // finish_reason arrives before the usage chunk, so keep
                // reading until [DONE] rather than stopping on it.
                match decode_stream_event(&event) {
                    StreamEvent::Done => {
                        let _ = tx.send(StreamChunk::Done { stop_reason });
                        return Ok(());
                    }
                    StreamEvent::Delta {
                        text,
                        finish_reason,
                        total_tokens,
                    } => {
                        if let Some(text) = text {
                            let _ = tx.send(StreamChunk::Text(text));
                        }
                        if finish_reason.is_some() {
                            stop_reason = finish_reason;
                        }
                        if let Some(total_tokens) = total_tokens {
                            let _ = tx.send(StreamChunk::Usage { total_tokens });
                        }
                    }
                    StreamEvent::Failed(message) => {
                        let _ = tx.send(StreamChunk::Error(message));
                        return Ok(());
                    }
                    StreamEvent::Skip => {}
                }
            }
        }

        // A body may end on `[DONE]` without the closing blank line.
        let closed = parser.finish().is_some_and(|event| event.is_done());
        if closed {
            let _ = tx.send(StreamChunk::Done { stop_reason });
        } else {
            let _ = tx.send(StreamChunk::Error("stream ended before [DONE]".into()));
        }
        Ok(())
    }
}
