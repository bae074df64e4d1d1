use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::AuthContext;

pub const BASE_PROMPT: &str = "You are a helpful AI assistant. Provide clear, concise, and accurate responses. If you have access to tools, use them when appropriate to help the user.";

const DIAGNOSTIC_HINT: &str = "If a tool you expect to have is unavailable, call the `check_providers` tool to see which tool providers failed to connect and tell the user.";

const CONTEXT_INSTRUCTION: &str =
    "Use the context above to provide relevant and personalized responses.";

/// Supplies domain context for a chat session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextLookup: Send + Sync {
    async fn get_context(&self, session_id: &str, auth: &AuthContext) -> anyhow::Result<String>;
}

/// Produces the system prompt for a turn.
#[derive(Clone)]
pub struct PromptBuilder {
    base: String,
    context: Option<Arc<dyn ContextLookup>>,
    timeout: Duration,
}

impl PromptBuilder {
    /// The diagnostic hint is only added when the `check_providers` tool exists, which
    /// needs a non-production deployment with at least one configured provider.
    pub fn new(is_production: bool, provider_count: usize, timeout: Duration) -> Self {
        let base = if is_production || provider_count == 0 {
            BASE_PROMPT.to_string()
        } else {
            format!("{BASE_PROMPT} {DIAGNOSTIC_HINT}")
        };
        Self {
            base,
            context: None,
            timeout,
        }
    }

    pub fn with_context_lookup(mut self, lookup: Arc<dyn ContextLookup>) -> Self {
        self.context = Some(lookup);
        self
    }

    /// The prompt used whenever no session context is available.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Builds the prompt, embedding session context when it can be fetched in time.
    pub async fn build(&self, session_id: Option<&str>, auth: Option<&AuthContext>) -> String {
        let (Some(session_id), Some(auth), Some(lookup)) = (session_id, auth, &self.context)
        else {
            return self.base.clone();
        };

        match tokio::time::timeout(self.timeout, lookup.get_context(session_id, auth)).await {
            Ok(Ok(context)) => {
                debug!(session_id, context_len = context.len(), "session context loaded");
                format!(
                    "<context>\n{context}\n</context>\n\n{CONTEXT_INSTRUCTION}\n\n{}",
                    self.base
                )
            }
            Ok(Err(e)) => {
                warn!(session_id, error = %e, "context lookup failed, using default prompt");
                self.base.clone()
            }
            Err(_) => {
                warn!(
                    session_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "context lookup timed out, using default prompt"
                );
                self.base.clone()
            }
        }
    }
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilder")
            .field("has_context_lookup", &self.context.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
