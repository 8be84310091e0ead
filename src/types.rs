use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Who authored a stored message. Closed set; system prompts are never
/// stored as messages, they are prepended at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role string. Anything outside the closed set is a
    /// constraint violation, not a silent coercion.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(CoreError::constraint(format!("invalid role '{}'", other))),
        }
    }
}

/// A titled, personality-bound thread of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub personality_id: String,
    pub title: String,
    pub summary: Option<String>,
}

/// One immutable message in a conversation. `screenshot_path` is a weak
/// reference into the capture directory; the sweep may orphan it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub screenshot_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, role: Role, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            screenshot_path: None,
            created_at: Utc::now(),
        }
    }
}

/// A named system-prompt profile shaping generation tone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub traits: Vec<String>,
    pub color: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A distilled fact extracted from a conversation, kept for later prompt
/// augmentation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub conversation_id: String,
    pub key: String,
    pub value: String,
    pub importance: i64,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(conversation_id: &str, key: &str, value: &str, importance: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            importance,
            created_at: Utc::now(),
        }
    }
}

/// A timestamped screen image with a content hash. `hash` and dimensions
/// are filled when the bytes were in hand (a fresh capture); metadata-only
/// reads from a directory scan leave them `None`.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureRecord {
    pub taken_at: DateTime<Utc>,
    pub path: PathBuf,
    pub hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Sampling configuration sent with every generation request. All fields
/// have documented defaults; call-site overrides win field-by-field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_predict: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            num_predict: 500,
        }
    }
}

impl SamplingParams {
    pub fn merged(&self, overrides: &SamplingOverrides) -> SamplingParams {
        SamplingParams {
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            top_k: overrides.top_k.unwrap_or(self.top_k),
            num_predict: overrides.num_predict.unwrap_or(self.num_predict),
        }
    }
}

/// Per-call sampling overrides. Unset fields fall back to the client's
/// configured params. Out-of-range values pass through to the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct SamplingOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub num_predict: Option<u32>,
}

/// Role on the generation wire. Unlike [`Role`], the wire carries the
/// leading system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        }
    }
}

/// One message as sent to the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: ChatRole::System,
            content: content.to_string(),
        }
    }

    pub fn from_message(msg: &Message) -> Self {
        Self {
            role: msg.role.into(),
            content: msg.content.clone(),
        }
    }
}

/// Read-only generation client introspection. Never fails.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationStatus {
    pub ready: bool,
    pub model: String,
}

/// One user turn as handed to the orchestrator by the shell boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: Option<String>,
    pub personality_id: String,
    pub text: String,
}

/// The result of a successful turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub conversation: Conversation,
    pub assistant_message: Message,
}
