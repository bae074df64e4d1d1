use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::chat::{FinishReason, Usage};

/// Events emitted to the caller while a chat turn is generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Incremental assistant text. `id` identifies the text part the delta belongs to.
    TextDelta { id: String, delta: String },

    /// Incremental extended-reasoning text.
    Reasoning { id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
        is_error: bool,
    },

    /// Terminal failure; nothing follows it.
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },

    /// Terminal success; nothing follows it.
    #[serde(rename_all = "camelCase")]
    Finish {
        finish_reason: FinishReason,
        usage: Usage,
    },
}

impl StreamEvent {
    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error_text: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error { .. } | StreamEvent::Finish { .. })
    }
}

/// Lazily consumed stream of chat output.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let delta = StreamEvent::TextDelta {
            id: "text-0".into(),
            delta: "Hel".into(),
        };
        assert_eq!(
            serde_json::to_value(&delta).unwrap(),
            json!({"type": "text-delta", "id": "text-0", "delta": "Hel"})
        );

        assert_eq!(
            serde_json::to_value(StreamEvent::error("boom")).unwrap(),
            json!({"type": "error", "errorText": "boom"})
        );

        let finish = StreamEvent::Finish {
            finish_reason: FinishReason::Stop,
            usage: Usage {
                input_tokens: 3,
                output_tokens: 5,
            },
        };
        assert_eq!(
            serde_json::to_value(&finish).unwrap(),
            json!({"type": "finish", "finishReason": "stop", "usage": {"inputTokens": 3, "outputTokens": 5}})
        );
        assert!(finish.is_terminal());
        assert!(!delta.is_terminal());
    }
}
