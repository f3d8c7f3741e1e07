//! Conversation model shared by both backends.
//!
//! History is append-only. Messages are never edited or removed one by
//! one; the only way to shrink a history is [`History::clear`], which the
//! admin reset uses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::agent_api::ChatMessage;

/// Marker appended in place of a cloud reply once the budget is spent.
pub const BUDGET_EXHAUSTED_NOTICE: &str = "[Cloud model disabled—budget exhausted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    AssistantLocal,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::AssistantLocal => "assistant_local",
        }
    }

    /// Speaker label used in the flat transcript fed to the local runner.
    pub fn transcript_label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant | Role::AssistantLocal => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_local(content: impl Into<String>) -> Self {
        Self::new(Role::AssistantLocal, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Ordered conversation for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Bulk clear. Only the admin reset should call this.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages the cloud model is allowed to see: `user` and `assistant`
    /// only. Replies produced by the local model stay out of its context.
    pub fn cloud_context(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .map(|m| ChatMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Flat transcript for the local runner. Includes everything, the
    /// local model's own replies too, and ends with an open `Assistant:`
    /// line for the model to complete.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for m in &self.messages {
            out.push_str(m.role.transcript_label());
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out.push_str("Assistant:");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> History {
        let mut h = History::new();
        h.push(Message::user("hi"));
        h.push(Message::assistant_local("local reply"));
        h.push(Message::user("again"));
        h
    }

    #[test]
    fn test_cloud_context_skips_local_replies() {
        let ctx = sample().cloud_context();
        let flat: Vec<String> = ctx
            .iter()
            .map(|m| format!("{}:{}", m.role, m.content))
            .collect();
        assert_eq!(flat, vec!["user:hi", "user:again"]);
    }

    #[test]
    fn test_cloud_context_keeps_cloud_replies() {
        let mut h = History::new();
        h.push(Message::user("q"));
        h.push(Message::assistant("a"));
        let ctx = h.cloud_context();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[1].role, "assistant");
    }

    #[test]
    fn test_transcript_includes_everything() {
        let t = sample().transcript();
        assert_eq!(t, "User: hi\nAssistant: local reply\nUser: again\nAssistant:");
    }

    #[test]
    fn test_empty_transcript_is_just_prompt() {
        assert_eq!(History::new().transcript(), "Assistant:");
    }

    #[test]
    fn test_role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::AssistantLocal).unwrap();
        assert_eq!(json, "\"assistant_local\"");
    }

    #[test]
    fn test_clear() {
        let mut h = sample();
        h.clear();
        assert!(h.is_empty());
    }
}
