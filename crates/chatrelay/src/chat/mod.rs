use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::error::ModelError;

pub mod convert;

pub use convert::to_model_messages;

/// Role of a caller-supplied message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

/// One typed part of a caller-supplied message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
        /// Provider signature; reasoning without one cannot be replayed to the model.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Part types this service does not forward to the model (step markers, files, ...).
    #[serde(other)]
    Unsupported,
}

/// A single message in the conversation history supplied with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: ChatRole,
    /// Plain-text shorthand, treated as a leading text part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(ChatRole::User, text)
    }

    fn with_text(role: ChatRole, text: impl Into<String>) -> Self {
        ChatMessage {
            id: None,
            role,
            content: None,
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }
}

/// Role in the model's native conversation format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    User,
    Assistant,
}

/// Content block in the model's native conversation format.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Thinking {
        thinking: String,
        signature: String,
    },
    /// Encrypted reasoning, returned to the model unchanged.
    RedactedThinking(String),
    ToolUse(ToolCall),
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: Vec<ContentBlock>,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments.
    pub parameters: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token accounting reported by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Streaming backends report counters cumulatively; later non-zero values win.
    pub fn merge_latest(&mut self, other: Usage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }

    pub fn accumulate(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other,
}

impl FinishReason {
    /// Maps a backend stop reason onto the wire vocabulary.
    pub fn from_stop_reason(stop_reason: &str) -> Self {
        match stop_reason {
            "end_turn" | "stop_sequence" | "stop" => FinishReason::Stop,
            "max_tokens" | "length" => FinishReason::Length,
            "tool_use" | "tool_calls" => FinishReason::ToolCalls,
            "refusal" | "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Other => "other",
        }
    }
}

/// Incremental output of one model invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),

    /// Extended reasoning delta
    Thinking(String),

    /// Signature closing a reasoning block
    ThinkingSignature(String),

    /// Reasoning block delivered encrypted, carrying its opaque data
    RedactedThinking(String),

    /// Tool use block started
    ToolUseStart {
        /// The index of this content block in the response
        index: usize,
        id: String,
        name: String,
    },

    /// Partial JSON of the tool input
    ToolUseInputDelta { index: usize, partial_json: String },

    Usage(Usage),

    /// Stream ended with stop reason
    Done { stop_reason: String },
}

/// Everything the backend needs for one generation step.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<Tool>,
    pub max_output_tokens: u32,
    /// Extended reasoning budget; `None` disables reasoning.
    pub reasoning_budget_tokens: Option<u32>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ModelError>> + Send>>;

/// Streaming contract of the model backend.
///
/// The returned stream is consumed lazily; dropping it releases the underlying
/// connection.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ModelError>;
}
