//! Conversion of caller-supplied messages into the model's native format.

use serde_json::Value;

use super::{ChatMessage, ChatRole, ContentBlock, MessagePart, ModelMessage, ModelRole, ToolCall};

/// Converts the caller's history into model messages.
///
/// Tool results always travel in a user-role message directly after the assistant
/// message that requested them. Consecutive messages with the same role are merged
/// and messages without forwardable content are dropped.
pub fn to_model_messages(messages: &[ChatMessage]) -> Vec<ModelMessage> {
    let mut out: Vec<ModelMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        let mut primary = Vec::new();
        let mut results = Vec::new();

        if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
            primary.push(ContentBlock::Text(text.to_string()));
        }

        for part in &message.parts {
            match part {
                MessagePart::Text { text } if !text.is_empty() => {
                    primary.push(ContentBlock::Text(text.clone()));
                }
                MessagePart::Reasoning {
                    text,
                    signature: Some(signature),
                } if message.role == ChatRole::Assistant => {
                    primary.push(ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: signature.clone(),
                    });
                }
                MessagePart::ToolCall {
                    tool_call_id,
                    tool_name,
                    input,
                } if message.role == ChatRole::Assistant => {
                    primary.push(ContentBlock::ToolUse(ToolCall {
                        id: tool_call_id.clone(),
                        name: tool_name.clone(),
                        arguments: normalize_input(input),
                    }));
                }
                MessagePart::ToolResult {
                    tool_call_id,
                    output,
                    is_error,
                    ..
                } => {
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: output_to_text(output),
                        is_error: *is_error,
                    });
                }
                _ => {}
            }
        }

        match message.role {
            ChatRole::Assistant => {
                push_merged(&mut out, ModelRole::Assistant, primary);
                push_merged(&mut out, ModelRole::User, results);
            }
            ChatRole::User | ChatRole::Tool => {
                // tool_result blocks must lead the user turn that follows a tool_use
                results.extend(primary);
                push_merged(&mut out, ModelRole::User, results);
            }
        }
    }

    out
}

fn push_merged(out: &mut Vec<ModelMessage>, role: ModelRole, content: Vec<ContentBlock>) {
    if content.is_empty() {
        return;
    }
    match out.last_mut() {
        Some(last) if last.role == role => last.content.extend(content),
        _ => out.push(ModelMessage { role, content }),
    }
}

fn normalize_input(input: &Value) -> Value {
    match input {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    }
}

/// Renders a tool output as the text the model sees.
pub(crate) fn output_to_text(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: Value) -> Vec<ChatMessage> {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn plain_conversation() {
        let messages = parse(json!([
            {"role": "user", "parts": [{"type": "text", "text": "hi"}]},
            {"role": "assistant", "parts": [{"type": "text", "text": "hello"}]},
            {"role": "user", "content": "how are you?"}
        ]));

        let model = to_model_messages(&messages);
        assert_eq!(model.len(), 3);
        assert_eq!(model[0].role, ModelRole::User);
        assert_eq!(model[1].content, vec![ContentBlock::Text("hello".into())]);
        assert_eq!(model[2].content, vec![ContentBlock::Text("how are you?".into())]);
    }

    #[test]
    fn tool_results_follow_the_assistant_turn() {
        let messages = parse(json!([
            {"role": "user", "parts": [{"type": "text", "text": "search rust"}]},
            {"role": "assistant", "parts": [
                {"type": "text", "text": "Searching."},
                {"type": "tool-call", "toolCallId": "c1", "toolName": "docs_search", "input": {"q": "rust"}},
                {"type": "tool-result", "toolCallId": "c1", "toolName": "docs_search", "output": {"hits": 2}}
            ]},
            {"role": "user", "parts": [{"type": "text", "text": "thanks"}]}
        ]));

        let model = to_model_messages(&messages);
        assert_eq!(model.len(), 3);
        assert_eq!(model[1].role, ModelRole::Assistant);
        assert!(matches!(&model[1].content[1], ContentBlock::ToolUse(call) if call.name == "docs_search"));

        // the trailing user text merges into the tool-result turn
        assert_eq!(model[2].role, ModelRole::User);
        assert_eq!(
            model[2].content,
            vec![
                ContentBlock::ToolResult {
                    tool_use_id: "c1".into(),
                    content: r#"{"hits":2}"#.into(),
                    is_error: false,
                },
                ContentBlock::Text("thanks".into()),
            ]
        );
    }

    #[test]
    fn tool_role_messages_become_user_results() {
        let messages = parse(json!([
            {"role": "assistant", "parts": [
                {"type": "tool-call", "toolCallId": "c9", "toolName": "lookup"}
            ]},
            {"role": "tool", "parts": [
                {"type": "tool-result", "toolCallId": "c9", "toolName": "lookup", "output": "boom", "isError": true}
            ]}
        ]));

        let model = to_model_messages(&messages);
        assert_eq!(model.len(), 2);
        assert!(matches!(
            &model[0].content[0],
            ContentBlock::ToolUse(call) if call.arguments == json!({})
        ));
        assert_eq!(
            model[1].content,
            vec![ContentBlock::ToolResult {
                tool_use_id: "c9".into(),
                content: "boom".into(),
                is_error: true,
            }]
        );
    }

    #[test]
    fn unsigned_reasoning_and_empty_messages_are_dropped() {
        let messages = parse(json!([
            {"role": "user", "parts": [{"type": "text", "text": "q"}]},
            {"role": "assistant", "parts": [
                {"type": "reasoning", "text": "private"},
                {"type": "step-start"}
            ]},
            {"role": "assistant", "parts": [
                {"type": "reasoning", "text": "kept", "signature": "abc"},
                {"type": "text", "text": "a"}
            ]}
        ]));

        let model = to_model_messages(&messages);
        assert_eq!(model.len(), 2);
        assert_eq!(
            model[1].content[0],
            ContentBlock::Thinking {
                thinking: "kept".into(),
                signature: "abc".into()
            }
        );
    }
}
