//! One chat turn: a bounded loop of model steps and tool executions.

use async_stream::stream;
use futures::StreamExt;
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chat::convert::output_to_text;
use crate::chat::{
    ChatProvider, ChatRequest, ContentBlock, FinishReason, ModelMessage, ModelRole, StreamChunk,
    ToolCall, Usage,
};
use crate::config::GenerationPolicy;
use crate::events::{EventStream, StreamEvent};
use crate::tools::{ToolOutput, ToolSet};

/// Fields attached to every log line of a turn.
#[derive(Debug, Clone)]
pub(crate) struct TurnLog {
    pub kind: &'static str,
    pub user_id: String,
    pub session_id: Option<String>,
}

pub(crate) struct Turn {
    pub provider: Arc<dyn ChatProvider>,
    pub tools: Arc<ToolSet>,
    pub policy: GenerationPolicy,
    pub log: TurnLog,
}

#[derive(Debug, Default)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// A tool call as assembled from the stream, with its input parse outcome.
struct AssembledCall {
    call: ToolCall,
    input_error: Option<String>,
}

/// Accumulates the output of one model step.
struct StepState {
    text_id: String,
    reasoning_id: String,
    text: String,
    thinking: String,
    /// Completed reasoning blocks in stream order.
    reasoning_blocks: Vec<ContentBlock>,
    tool_uses: BTreeMap<usize, PendingToolUse>,
    usage: Usage,
    stop_reason: Option<String>,
}

impl StepState {
    fn new(step: u32) -> Self {
        Self {
            text_id: format!("text-{step}"),
            reasoning_id: format!("reasoning-{step}"),
            text: String::new(),
            thinking: String::new(),
            reasoning_blocks: Vec::new(),
            tool_uses: BTreeMap::new(),
            usage: Usage::default(),
            stop_reason: None,
        }
    }

    fn apply(&mut self, chunk: StreamChunk) -> Option<StreamEvent> {
        match chunk {
            StreamChunk::Text(delta) => {
                self.text.push_str(&delta);
                Some(StreamEvent::TextDelta {
                    id: self.text_id.clone(),
                    delta,
                })
            }
            StreamChunk::Thinking(delta) => {
                self.thinking.push_str(&delta);
                Some(StreamEvent::Reasoning {
                    id: self.reasoning_id.clone(),
                    delta,
                })
            }
            StreamChunk::ThinkingSignature(signature) => {
                let thinking = std::mem::take(&mut self.thinking);
                self.reasoning_blocks.push(ContentBlock::Thinking {
                    thinking,
                    signature,
                });
                None
            }
            StreamChunk::RedactedThinking(data) => {
                self.reasoning_blocks.push(ContentBlock::RedactedThinking(data));
                None
            }
            StreamChunk::ToolUseStart { index, id, name } => {
                self.tool_uses.insert(
                    index,
                    PendingToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                );
                None
            }
            StreamChunk::ToolUseInputDelta {
                index,
                partial_json,
            } => {
                match self.tool_uses.get_mut(&index) {
                    Some(pending) => pending.input_json.push_str(&partial_json),
                    None => warn!(index, "tool input delta for unknown block"),
                }
                None
            }
            StreamChunk::Usage(usage) => {
                self.usage.merge_latest(usage);
                None
            }
            StreamChunk::Done { stop_reason } => {
                self.stop_reason = Some(stop_reason);
                None
            }
        }
    }

    fn has_reasoning(&self) -> bool {
        !self.reasoning_blocks.is_empty() || !self.thinking.is_empty()
    }

    fn tool_calls(&mut self) -> Vec<AssembledCall> {
        std::mem::take(&mut self.tool_uses)
            .into_values()
            .map(|pending| {
                let (arguments, input_error) = parse_tool_input(&pending.input_json);
                AssembledCall {
                    call: ToolCall {
                        id: pending.id,
                        name: pending.name,
                        arguments,
                    },
                    input_error,
                }
            })
            .collect()
    }

    /// Assistant content to replay on the next step: reasoning, text, tool uses.
    fn assistant_content(&mut self, calls: &[AssembledCall]) -> Vec<ContentBlock> {
        let mut content = std::mem::take(&mut self.reasoning_blocks);
        if !self.text.is_empty() {
            content.push(ContentBlock::Text(std::mem::take(&mut self.text)));
        }
        content.extend(calls.iter().map(|c| ContentBlock::ToolUse(c.call.clone())));
        content
    }
}

fn parse_tool_input(raw: &str) -> (Value, Option<String>) {
    if raw.trim().is_empty() {
        return (Value::Object(Default::default()), None);
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => (value, None),
        Ok(other) => (
            Value::Object(Default::default()),
            Some(format!("Tool input must be a JSON object, got {other}")),
        ),
        Err(e) => (
            Value::Object(Default::default()),
            Some(format!("Invalid tool input: {e}")),
        ),
    }
}

async fn execute(tools: &ToolSet, assembled: &AssembledCall) -> ToolOutput {
    let call = &assembled.call;
    if let Some(reason) = &assembled.input_error {
        return ToolOutput::error(reason.clone());
    }
    let Some(tool) = tools.get(&call.name) else {
        warn!(tool = %call.name, "model requested an unknown tool");
        return ToolOutput::error(format!("Unknown tool: {}", call.name));
    };
    let provider = tool.provider_name().unwrap_or("local");
    match tool.call(call.arguments.clone()).await {
        Ok(output) => {
            if output.is_error {
                warn!(tool = %call.name, provider, "tool reported an error");
            }
            output
        }
        Err(e) => {
            warn!(tool = %call.name, provider, error = %e, "tool call failed");
            ToolOutput::error(e.to_string())
        }
    }
}

impl Turn {
    /// Runs the turn lazily: nothing happens until the returned stream is first polled.
    pub(crate) fn run<P>(self, system: P, mut messages: Vec<ModelMessage>) -> EventStream
    where
        P: Future<Output = String> + Send + 'static,
    {
        let Turn {
            provider,
            tools,
            policy,
            log,
        } = self;

        Box::pin(stream! {
            let system = system.await;
            let descriptors = tools.descriptors();
            let max_steps = policy.max_steps.max(1);

            let mut usage = Usage::default();
            let mut finish_reason: FinishReason;
            let mut has_reasoning = false;
            let mut steps = 0u32;

            loop {
                steps += 1;
                let request = ChatRequest {
                    system: system.clone(),
                    messages: messages.clone(),
                    tools: descriptors.clone(),
                    max_output_tokens: policy.max_output_tokens,
                    reasoning_budget_tokens: policy.reasoning_budget_tokens,
                };

                let mut chunks = match provider.chat_stream(&request).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        error!(kind = log.kind, user_id = %log.user_id, session_id = ?log.session_id, step = steps, error = %e, "model request failed");
                        yield StreamEvent::error(e.to_string());
                        return;
                    }
                };

                let mut step = StepState::new(steps);
                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(chunk) => {
                            if let Some(event) = step.apply(chunk) {
                                yield event;
                            }
                        }
                        Err(e) => {
                            error!(kind = log.kind, user_id = %log.user_id, session_id = ?log.session_id, step = steps, error = %e, "model stream failed");
                            yield StreamEvent::error(e.to_string());
                            return;
                        }
                    }
                }
                drop(chunks);

                let Some(stop_reason) = step.stop_reason.clone() else {
                    error!(kind = log.kind, user_id = %log.user_id, step = steps, "model stream ended without a stop reason");
                    yield StreamEvent::error("Model response ended unexpectedly");
                    return;
                };
                finish_reason = FinishReason::from_stop_reason(&stop_reason);
                usage.accumulate(step.usage);
                has_reasoning |= step.has_reasoning();

                let calls = step.tool_calls();
                for assembled in &calls {
                    yield StreamEvent::ToolCall {
                        tool_call_id: assembled.call.id.clone(),
                        tool_name: assembled.call.name.clone(),
                        input: assembled.call.arguments.clone(),
                    };
                }

                if calls.is_empty() {
                    break;
                }

                let outputs = join_all(calls.iter().map(|c| execute(&tools, c))).await;

                let mut results = Vec::with_capacity(outputs.len());
                for (assembled, output) in calls.iter().zip(outputs) {
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: assembled.call.id.clone(),
                        content: output_to_text(&output.content),
                        is_error: output.is_error,
                    });
                    yield StreamEvent::ToolResult {
                        tool_call_id: assembled.call.id.clone(),
                        tool_name: assembled.call.name.clone(),
                        output: output.content,
                        is_error: output.is_error,
                    };
                }

                if steps >= max_steps {
                    warn!(kind = log.kind, user_id = %log.user_id, steps, "step limit reached, skipping further model calls");
                    break;
                }

                messages.push(ModelMessage {
                    role: ModelRole::Assistant,
                    content: step.assistant_content(&calls),
                });
                messages.push(ModelMessage {
                    role: ModelRole::User,
                    content: results,
                });
            }

            info!(
                kind = log.kind,
                user_id = %log.user_id,
                session_id = ?log.session_id,
                finish_reason = finish_reason.as_str(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                has_reasoning,
                steps,
                "chat turn finished"
            );
            yield StreamEvent::Finish {
                finish_reason,
                usage,
            };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_state_assembles_tool_calls_in_block_order() {
        let mut step = StepState::new(1);
        let chunks = vec![
            StreamChunk::Thinking("plan".into()),
            StreamChunk::ThinkingSignature("sig".into()),
            StreamChunk::Text("Looking".into()),
            StreamChunk::ToolUseStart { index: 3, id: "b".into(), name: "second".into() },
            StreamChunk::ToolUseStart { index: 2, id: "a".into(), name: "first".into() },
            StreamChunk::ToolUseInputDelta { index: 2, partial_json: "{\"x\":".into() },
            StreamChunk::ToolUseInputDelta { index: 2, partial_json: "1}".into() },
            StreamChunk::ToolUseInputDelta { index: 3, partial_json: "[1]".into() },
        ];
        let events: Vec<_> = chunks.into_iter().filter_map(|c| step.apply(c)).collect();
        assert_eq!(events.len(), 2);
        assert!(step.has_reasoning());

        let calls = step.tool_calls();
        assert_eq!(calls[0].call.name, "first");
        assert_eq!(calls[0].call.arguments, json!({"x": 1}));
        assert!(calls[0].input_error.is_none());
        assert_eq!(calls[1].call.arguments, json!({}));
        assert!(calls[1].input_error.is_some());

        let content = step.assistant_content(&calls);
        assert_eq!(
            content[0],
            ContentBlock::Thinking { thinking: "plan".into(), signature: "sig".into() }
        );
        assert_eq!(content[1], ContentBlock::Text("Looking".into()));
        assert_eq!(content.len(), 4);
    }

    #[test]
    fn redacted_reasoning_is_replayed_in_order() {
        let mut step = StepState::new(1);
        for chunk in [
            StreamChunk::RedactedThinking("opaque".into()),
            StreamChunk::Thinking("visible".into()),
            StreamChunk::ThinkingSignature("sig".into()),
            StreamChunk::ToolUseStart { index: 2, id: "c1".into(), name: "docs_search".into() },
        ] {
            assert!(!matches!(step.apply(chunk), Some(StreamEvent::TextDelta { .. })));
        }
        assert!(step.has_reasoning());

        let calls = step.tool_calls();
        let content = step.assistant_content(&calls);
        assert_eq!(
            content,
            vec![
                ContentBlock::RedactedThinking("opaque".into()),
                ContentBlock::Thinking { thinking: "visible".into(), signature: "sig".into() },
                ContentBlock::ToolUse(calls[0].call.clone()),
            ]
        );
    }

    #[test]
    fn empty_tool_input_is_an_empty_object() {
        assert_eq!(parse_tool_input("  "), (json!({}), None));
    }
}
