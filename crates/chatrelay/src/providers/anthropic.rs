//! Streaming client for the Anthropic Messages API.

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::chat::{
    ChatProvider, ChatRequest, ChunkStream, ContentBlock, ModelRole, StreamChunk, Usage,
};
use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize, Debug)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Serialize, Debug)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: u32,
}

#[derive(Serialize, Debug)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: Vec<MessageContent<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent<'a> {
    Text {
        text: &'a str,
    },
    Thinking {
        thinking: &'a str,
        signature: &'a str,
    },
    RedactedThinking {
        data: &'a str,
    },
    ToolUse {
        id: &'a str,
        name: &'a str,
        input: &'a Value,
    },
    ToolResult {
        tool_use_id: &'a str,
        content: &'a str,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Request payload for the streaming messages endpoint.
#[derive(Serialize, Debug)]
struct AnthropicStreamRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    stream: bool,
}

impl<'a> AnthropicStreamRequest<'a> {
    fn new(model: &'a str, request: &'a ChatRequest) -> Self {
        let messages = request
            .messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    ModelRole::User => "user",
                    ModelRole::Assistant => "assistant",
                },
                content: m.content.iter().map(message_content).collect(),
            })
            .collect();

        let tools = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
            })
            .collect();

        Self {
            model,
            max_tokens: request.max_output_tokens,
            system: &request.system,
            messages,
            tools,
            thinking: request.reasoning_budget_tokens.map(|budget_tokens| ThinkingConfig {
                thinking_type: "enabled",
                budget_tokens,
            }),
            stream: true,
        }
    }
}

fn message_content(block: &ContentBlock) -> MessageContent<'_> {
    match block {
        ContentBlock::Text(text) => MessageContent::Text { text },
        ContentBlock::Thinking {
            thinking,
            signature,
        } => MessageContent::Thinking {
            thinking,
            signature,
        },
        ContentBlock::RedactedThinking(data) => MessageContent::RedactedThinking { data },
        ContentBlock::ToolUse(call) => MessageContent::ToolUse {
            id: &call.id,
            name: &call.name,
            input: &call.arguments,
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => MessageContent::ToolResult {
            tool_use_id,
            content,
            is_error: *is_error,
        },
    }
}

#[derive(Deserialize, Debug)]
struct AnthropicStreamResponse {
    #[serde(rename = "type")]
    response_type: String,
    /// Index of the content block (content_block_start / content_block_delta)
    index: Option<usize>,
    content_block: Option<AnthropicStreamContentBlock>,
    /// Delta for content_block_delta and message_delta events
    delta: Option<AnthropicDelta>,
    /// Present on message_start
    message: Option<AnthropicStreamMessage>,
    /// Present on message_delta
    usage: Option<AnthropicUsage>,
    /// Present on error
    error: Option<AnthropicErrorBody>,
}

#[derive(Deserialize, Debug)]
struct AnthropicStreamContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
    /// Opaque payload of a redacted_thinking block
    data: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AnthropicDelta {
    text: Option<String>,
    partial_json: Option<String>,
    thinking: Option<String>,
    signature: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct AnthropicStreamMessage {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

#[derive(Deserialize, Debug)]
struct AnthropicErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl From<AnthropicErrorBody> for ModelError {
    fn from(e: AnthropicErrorBody) -> Self {
        match e.error_type.as_str() {
            "authentication_error" | "permission_error" => ModelError::AuthError(e.message),
            "invalid_request_error" => ModelError::InvalidRequest(e.message),
            other => ModelError::ProviderError {
                status: match other {
                    "rate_limit_error" => 429,
                    "overloaded_error" => 529,
                    _ => 500,
                },
                message: e.message,
            },
        }
    }
}

/// Parses one line of the event stream. Lines other than `data:` lines yield nothing.
fn parse_stream_line(line: &str) -> Result<Vec<StreamChunk>, ModelError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }

    let resp: AnthropicStreamResponse =
        serde_json::from_str(data).map_err(|e| ModelError::ResponseFormatError {
            message: format!("Failed to parse Anthropic stream data: {e}"),
            raw_response: data.to_string(),
        })?;

    let mut chunks = Vec::new();
    match resp.response_type.as_str() {
        "message_start" => {
            if let Some(usage) = resp.message.and_then(|m| m.usage) {
                chunks.push(StreamChunk::Usage(usage.into()));
            }
        }
        "content_block_start" => {
            if let (Some(index), Some(block)) = (resp.index, resp.content_block) {
                match block.block_type.as_str() {
                    "tool_use" => chunks.push(StreamChunk::ToolUseStart {
                        index,
                        id: block.id.unwrap_or_default(),
                        name: block.name.unwrap_or_default(),
                    }),
                    "redacted_thinking" => {
                        chunks.push(StreamChunk::RedactedThinking(block.data.unwrap_or_default()))
                    }
                    _ => {}
                }
            }
        }
        "content_block_delta" => {
            if let (Some(index), Some(delta)) = (resp.index, resp.delta) {
                if let Some(text) = delta.text {
                    chunks.push(StreamChunk::Text(text));
                } else if let Some(thinking) = delta.thinking {
                    chunks.push(StreamChunk::Thinking(thinking));
                } else if let Some(signature) = delta.signature {
                    chunks.push(StreamChunk::ThinkingSignature(signature));
                } else if let Some(partial_json) = delta.partial_json {
                    chunks.push(StreamChunk::ToolUseInputDelta {
                        index,
                        partial_json,
                    });
                }
            }
        }
        "message_delta" => {
            if let Some(usage) = resp.usage {
                chunks.push(StreamChunk::Usage(usage.into()));
            }
            if let Some(stop_reason) = resp.delta.and_then(|d| d.stop_reason) {
                chunks.push(StreamChunk::Done { stop_reason });
            }
        }
        "error" => {
            let body = resp.error.unwrap_or(AnthropicErrorBody {
                error_type: "api_error".to_string(),
                message: "unknown streaming error".to_string(),
            });
            return Err(body.into());
        }
        _ => {}
    }
    Ok(chunks)
}

/// Splits a byte stream into lines and parses each one. Ends after the first error.
fn parse_event_stream<S>(body: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let next = body.next().await;
            let tail = match next {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    false
                }
                Some(Err(e)) => {
                    yield Err(ModelError::from(e));
                    return;
                }
                None => true,
            };

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_stream_line(line.trim_end()) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if tail {
                if !buffer.is_empty() {
                    let line = String::from_utf8_lossy(&buffer).into_owned();
                    buffer.clear();
                    match parse_stream_line(line.trim_end()) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Err(e) => yield Err(e),
                    }
                }
                return;
            }
        }
    })
}

/// Anthropic Messages API backend.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: Url,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ModelError::AuthError("Missing Anthropic API key".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: Url::parse(DEFAULT_BASE_URL)?,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ModelError> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    fn endpoint(&self) -> Result<Url, ModelError> {
        Ok(self.base_url.join("v1/messages")?)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    #[instrument(name = "anthropic.chat_stream", skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ModelError> {
        let body = AnthropicStreamRequest::new(&self.model, request);

        let resp = self
            .client
            .post(self.endpoint()?)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let raw = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&raw)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(raw);
            return Err(match status.as_u16() {
                401 | 403 => ModelError::AuthError(message),
                code => ModelError::ProviderError {
                    status: code,
                    message,
                },
            });
        }

        Ok(parse_event_stream(resp.bytes_stream()))
    }
}
