use anyhow::Result;
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, ClientInfo, Tool as RmcpTool};
use rmcp::service::RunningService;
use rmcp::RoleClient;
use serde_json::Value;
use std::sync::Arc;

use crate::chat::Tool;
use crate::tools::{CallFunctionTool, ToolOutput};

/// Live connection to one tool provider. Dropping the last handle closes the session.
pub type ProviderSession = Arc<RunningService<RoleClient, ClientInfo>>;

impl From<&RmcpTool> for Tool {
    fn from(r: &RmcpTool) -> Self {
        Tool {
            name: r.name.to_string(),
            description: r
                .description
                .as_deref()
                .map(str::to_string)
                .unwrap_or_default(),
            parameters: r.schema_as_json_value(),
        }
    }
}

/// Exposes one remote MCP tool to the model loop under its provider-local name.
pub struct McpToolAdapter {
    provider: String,
    mcp_tool: RmcpTool,
    session: ProviderSession,
    tool: Tool,
}

impl McpToolAdapter {
    pub fn new(provider: impl Into<String>, mcp_tool: RmcpTool, session: ProviderSession) -> Self {
        let tool = Tool::from(&mcp_tool);
        tracing::debug!(tool = %tool.name, "adding mcp tool");
        Self {
            provider: provider.into(),
            mcp_tool,
            session,
            tool,
        }
    }
}

#[async_trait]
impl CallFunctionTool for McpToolAdapter {
    fn descriptor(&self) -> Tool {
        self.tool.clone()
    }

    async fn call(&self, args: Value) -> Result<ToolOutput> {
        let mut request = CallToolRequestParams::new(self.mcp_tool.name.clone());
        if let Value::Object(map) = args {
            request = request.with_arguments(map);
        }

        let call_result = self.session.peer().call_tool(request).await?;

        let is_error = call_result.is_error.unwrap_or(false);
        Ok(ToolOutput {
            content: serde_json::to_value(&call_result)?,
            is_error,
        })
    }

    fn provider_name(&self) -> Option<&str> {
        Some(&self.provider)
    }
}
