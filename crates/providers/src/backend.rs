//! Backend seams used by the chat orchestrator.
//!
//! The cloud side is a hosted chat-completion API; the local side is an
//! external model runner driven as a subprocess. Both are traits so the
//! orchestrator can be exercised against in-memory fakes.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, StreamChunk};
use shared::error::ProcessError;
use tokio::sync::mpsc::UnboundedSender;

/// One completion request to the cloud model.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudReply {
    pub text: String,
    /// Total tokens (prompt + completion) as reported by the service.
    /// `None` when the service left usage out.
    pub total_tokens: Option<u64>,
}

#[async_trait::async_trait]
pub trait CloudBackend: Send + Sync {
    /// Fetch the whole reply in one response.
    async fn complete(&self, request: &CloudRequest) -> Result<CloudReply>;

    /// Stream the reply as a finite sequence of chunks.
    ///
    /// Contract: if the request fails before any chunk is sent, returns
    /// `Err(...)`. Once streaming has started, failures go through
    /// `StreamChunk::Error`. The sender is dropped when the method returns,
    /// which ends the sequence; replaying it means issuing a new request.
    async fn stream(&self, request: &CloudRequest, tx: UnboundedSender<StreamChunk>) -> Result<()>;
}

/// Whether the local runner can be used for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalStatus {
    Available,
    /// Switched off by the user.
    Disabled,
    Unavailable { reason: String },
}

impl LocalStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, LocalStatus::Available)
    }

    /// Short notice for the local pane when the runner is skipped.
    pub fn notice(&self) -> Option<String> {
        match self {
            LocalStatus::Available => None,
            LocalStatus::Disabled => Some("Local model is turned off.".to_string()),
            LocalStatus::Unavailable { reason } => {
                Some(format!("Local model unavailable: {}", reason))
            }
        }
    }
}

#[async_trait::async_trait]
pub trait LocalBackend: Send + Sync {
    /// Name of the external tool, for display.
    fn tool(&self) -> &str;

    /// Availability for this turn. `enabled` is the user's toggle.
    fn status(&self, enabled: bool) -> LocalStatus;

    /// Feed `transcript` to the runner for `model` and return its output.
    async fn run(&self, model: &str, transcript: &str) -> Result<String, ProcessError>;
}
