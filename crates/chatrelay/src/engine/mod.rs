//! The chat engine: toolset, prompt and model wired into one reusable handle.

use std::sync::Arc;
use tracing::info;

use crate::auth::AuthContext;
use crate::chat::{ChatMessage, ChatProvider, to_model_messages};
use crate::config::{ChatEngineConfig, GenerationPolicy};
use crate::events::EventStream;
use crate::mcp::{self, ProviderConnector, ProviderStatuses};
use crate::prompt::{ContextLookup, PromptBuilder};
use crate::router::ChatController;
use crate::tools::ToolSet;

mod turn;

use turn::{Turn, TurnLog};

/// Immutable after construction; one engine serves any number of concurrent turns.
pub struct ChatEngine {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolSet>,
    statuses: Arc<ProviderStatuses>,
    prompt: PromptBuilder,
    policy: GenerationPolicy,
}

impl ChatEngine {
    /// Connects every configured tool provider and assembles the engine.
    pub async fn initialize(
        config: &ChatEngineConfig,
        provider: Arc<dyn ChatProvider>,
        connector: &dyn ProviderConnector,
        context: Option<Arc<dyn ContextLookup>>,
    ) -> Self {
        info!(
            model = %config.model,
            providers = config.tool_providers.len(),
            is_production = config.is_production,
            has_context = context.is_some(),
            "initializing chat engine"
        );
        let (tools, statuses) =
            mcp::initialize(&config.tool_providers, config.is_production, connector).await;

        let mut prompt = PromptBuilder::new(
            config.is_production,
            config.tool_providers.len(),
            config.context_timeout,
        );
        if let Some(lookup) = context {
            prompt = prompt.with_context_lookup(lookup);
        }

        Self::from_parts(provider, tools, statuses, prompt, config.policy)
    }

    pub fn from_parts(
        provider: Arc<dyn ChatProvider>,
        tools: ToolSet,
        statuses: ProviderStatuses,
        prompt: PromptBuilder,
        policy: GenerationPolicy,
    ) -> Self {
        Self {
            provider,
            tools: Arc::new(tools),
            statuses: Arc::new(statuses),
            prompt,
            policy,
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn statuses(&self) -> &ProviderStatuses {
        &self.statuses
    }

    fn turn(&self, log: TurnLog) -> Turn {
        Turn {
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            policy: self.policy,
            log,
        }
    }

    /// Generic chat with the base prompt.
    pub fn stream_chat(&self, auth: &AuthContext, messages: &[ChatMessage]) -> EventStream {
        info!(user_id = %auth.user_id, message_count = messages.len(), "starting chat stream");
        let system = self.prompt.base().to_string();
        self.turn(TurnLog {
            kind: "generic",
            user_id: auth.user_id.clone(),
            session_id: None,
        })
        .run(async move { system }, to_model_messages(messages))
    }

    /// Chat whose prompt carries the session's context, when it can be fetched.
    pub fn stream_session_chat(
        &self,
        session_id: &str,
        auth: &AuthContext,
        messages: &[ChatMessage],
    ) -> EventStream {
        info!(
            session_id,
            user_id = %auth.user_id,
            message_count = messages.len(),
            "starting session chat stream"
        );
        let prompt = self.prompt.clone();
        let session = session_id.to_string();
        let caller = auth.clone();
        self.turn(TurnLog {
            kind: "session",
            user_id: auth.user_id.clone(),
            session_id: Some(session_id.to_string()),
        })
        .run(
            async move { prompt.build(Some(&session), Some(&caller)).await },
            to_model_messages(messages),
        )
    }
}

impl ChatController for ChatEngine {
    fn stream_chat(&self, auth: &AuthContext, messages: &[ChatMessage]) -> EventStream {
        ChatEngine::stream_chat(self, auth, messages)
    }

    fn stream_session_chat(
        &self,
        session_id: &str,
        auth: &AuthContext,
        messages: &[ChatMessage],
    ) -> EventStream {
        ChatEngine::stream_session_chat(self, session_id, auth, messages)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::chat::{ChatProvider, ChatRequest, ChunkStream, StreamChunk, Usage};
    use crate::error::ModelError;

    /// One scripted model step: chunks to emit, optionally followed by a failure.
    pub struct Step {
        pub chunks: Vec<StreamChunk>,
        pub fail_with: Option<String>,
    }

    impl Step {
        pub fn text(parts: &[&str], stop_reason: &str) -> Self {
            let mut chunks: Vec<StreamChunk> =
                parts.iter().map(|p| StreamChunk::Text(p.to_string())).collect();
            chunks.push(StreamChunk::Usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }));
            chunks.push(StreamChunk::Done {
                stop_reason: stop_reason.to_string(),
            });
            Self {
                chunks,
                fail_with: None,
            }
        }

        pub fn tool_use(calls: &[(&str, &str, &str)]) -> Self {
            let mut chunks = Vec::new();
            for (index, (id, name, input)) in calls.iter().enumerate() {
                chunks.push(StreamChunk::ToolUseStart {
                    index,
                    id: id.to_string(),
                    name: name.to_string(),
                });
                chunks.push(StreamChunk::ToolUseInputDelta {
                    index,
                    partial_json: input.to_string(),
                });
            }
            chunks.push(StreamChunk::Usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }));
            chunks.push(StreamChunk::Done {
                stop_reason: "tool_use".into(),
            });
            Self {
                chunks,
                fail_with: None,
            }
        }

        pub fn failing_after(parts: &[&str], message: &str) -> Self {
            Self {
                chunks: parts.iter().map(|p| StreamChunk::Text(p.to_string())).collect(),
                fail_with: Some(message.to_string()),
            }
        }
    }

    /// Model backend that replays scripted steps and records every request.
    #[derive(Default)]
    pub struct ScriptedProvider {
        steps: Mutex<VecDeque<Step>>,
        pub requests: Mutex<Vec<ChatRequest>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::InvalidRequest("no scripted step left".into()))?;

            let mut items: Vec<Result<StreamChunk, ModelError>> =
                step.chunks.into_iter().map(Ok).collect();
            if let Some(message) = step.fail_with {
                items.push(Err(ModelError::HttpError(message)));
            }
            Ok(Box::pin(stream::iter(items)))
        }
    }
}
