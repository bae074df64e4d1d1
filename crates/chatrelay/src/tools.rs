use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::chat::Tool;

/// Result of a tool invocation as handed back to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// A callable tool exposed to the model loop.
#[async_trait]
pub trait CallFunctionTool: Send + Sync {
    fn descriptor(&self) -> Tool;

    async fn call(&self, args: Value) -> anyhow::Result<ToolOutput>;

    /// Name of the tool provider backing this tool, if any.
    fn provider_name(&self) -> Option<&str> {
        None
    }
}

/// Exposes an inner tool under a different (namespaced) name.
pub struct RenamedTool {
    name: String,
    inner: Arc<dyn CallFunctionTool>,
}

impl RenamedTool {
    pub fn new(name: impl Into<String>, inner: Arc<dyn CallFunctionTool>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

#[async_trait]
impl CallFunctionTool for RenamedTool {
    fn descriptor(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            ..self.inner.descriptor()
        }
    }

    async fn call(&self, args: Value) -> anyhow::Result<ToolOutput> {
        self.inner.call(args).await
    }

    fn provider_name(&self) -> Option<&str> {
        self.inner.provider_name()
    }
}

/// The aggregated, read-only toolset of one chat engine.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn CallFunctionTool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool` under `key`. Returns `false` and keeps the existing entry on collision.
    pub fn insert(&mut self, key: impl Into<String>, tool: Arc<dyn CallFunctionTool>) -> bool {
        let key = key.into();
        if self.tools.contains_key(&key) {
            tracing::warn!(tool = %key, "duplicate tool name, keeping first instance");
            return false;
        }
        self.tools.insert(key, tool);
        true
    }

    /// Registers `tool` under `key`, displacing any existing entry.
    pub fn replace(
        &mut self,
        key: impl Into<String>,
        tool: Arc<dyn CallFunctionTool>,
    ) -> Option<Arc<dyn CallFunctionTool>> {
        self.tools.insert(key.into(), tool)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn CallFunctionTool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Tool definitions in name order, ready for a model request.
    pub fn descriptors(&self) -> Vec<Tool> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.tools.keys()).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_tools {
    use super::*;
    use serde_json::json;

    /// Tool that echoes its arguments back.
    pub struct EchoTool {
        pub name: String,
    }

    #[async_trait]
    impl CallFunctionTool for EchoTool {
        fn descriptor(&self) -> Tool {
            Tool {
                name: self.name.clone(),
                description: format!("echoes arguments ({})", self.name),
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(&self, args: Value) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::ok(json!({ "echo": args })))
        }
    }

    /// Tool that always fails.
    pub struct FailingTool;

    #[async_trait]
    impl CallFunctionTool for FailingTool {
        fn descriptor(&self) -> Tool {
            Tool {
                name: "explode".into(),
                description: "always fails".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn call(&self, _args: Value) -> anyhow::Result<ToolOutput> {
            anyhow::bail!("tool exploded")
        }
    }
}
