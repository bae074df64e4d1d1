//! Fan-out initialization of every configured tool provider.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

use super::client::ProviderConnector;
use super::config::ToolProviderConfig;
use super::naming::{default_provider_name, namespaced_tool_name, sanitize_identifier};
use crate::chat::Tool;
use crate::tools::{CallFunctionTool, RenamedTool, ToolOutput, ToolSet};

/// Name of the diagnostic pseudo-tool injected outside production.
pub const CHECK_PROVIDERS_TOOL: &str = "check_providers";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Failed,
}

/// Outcome of one provider's connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProviderStatus {
    pub status: ConnectionState,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
}

impl ToolProviderStatus {
    fn connected(url: &str, tool_count: usize) -> Self {
        Self {
            status: ConnectionState::Connected,
            url: url.to_string(),
            error: None,
            tool_count: Some(tool_count),
        }
    }

    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Failed,
            url: url.to_string(),
            error: Some(error.into()),
            tool_count: None,
        }
    }
}

/// Per-provider statuses keyed by sanitized provider name.
pub type ProviderStatuses = BTreeMap<String, ToolProviderStatus>;

/// Assigns each config its sanitized, unique provider name in declaration order.
fn assign_provider_names(configs: &[ToolProviderConfig]) -> Vec<String> {
    let mut taken = HashSet::new();
    configs
        .iter()
        .enumerate()
        .map(|(position, cfg)| {
            let base = cfg
                .name
                .as_deref()
                .map(sanitize_identifier)
                .filter(|name| !name.is_empty() && name != "_")
                .unwrap_or_else(|| default_provider_name(position));

            let mut name = base.clone();
            let mut suffix = 2;
            while !taken.insert(name.clone()) {
                name = format!("{base}_{suffix}");
                suffix += 1;
            }
            if name != base {
                warn!(provider = %base, renamed = %name, "duplicate provider name");
            }
            name
        })
        .collect()
}

/// Connects to every provider concurrently and folds the outcomes into one toolset.
///
/// A failing provider is recorded in the statuses and contributes no tools; it never
/// aborts aggregation. The returned toolset is complete: nothing is exposed until
/// every attempt has settled.
pub async fn initialize(
    configs: &[ToolProviderConfig],
    is_production: bool,
    connector: &dyn ProviderConnector,
) -> (ToolSet, ProviderStatuses) {
    let names = assign_provider_names(configs);

    let attempts = names
        .iter()
        .zip(configs)
        .map(|(name, cfg)| async move { (name, cfg, connector.connect(name, cfg).await) });
    let outcomes = join_all(attempts).await;

    let mut toolset = ToolSet::new();
    let mut statuses = ProviderStatuses::new();
    for (name, cfg, outcome) in outcomes {
        match outcome {
            Ok(tools) => {
                info!(provider = %name, url = %cfg.url, tool_count = tools.len(), "tool provider connected");
                statuses.insert(name.clone(), ToolProviderStatus::connected(&cfg.url, tools.len()));
                for tool in tools {
                    let key = namespaced_tool_name(name, &tool.descriptor().name);
                    toolset.insert(key.clone(), Arc::new(RenamedTool::new(key, tool)));
                }
            }
            Err(e) => {
                warn!(provider = %name, url = %cfg.url, error = %e, "tool provider failed");
                statuses.insert(name.clone(), ToolProviderStatus::failed(&cfg.url, e.to_string()));
            }
        }
    }

    if !configs.is_empty() && !is_production {
        let diagnostic = CheckProvidersTool::new(statuses.clone(), toolset.len());
        if toolset.replace(CHECK_PROVIDERS_TOOL, Arc::new(diagnostic)).is_some() {
            warn!("provider tool `{CHECK_PROVIDERS_TOOL}` shadowed by the diagnostic tool");
        }
    }

    info!(
        providers = configs.len(),
        tools = toolset.len(),
        "tool aggregation finished"
    );
    (toolset, statuses)
}

/// Reports the provider statuses captured at aggregation time.
pub struct CheckProvidersTool {
    statuses: ProviderStatuses,
    total_tool_count: usize,
}

impl CheckProvidersTool {
    pub fn new(statuses: ProviderStatuses, total_tool_count: usize) -> Self {
        Self {
            statuses,
            total_tool_count,
        }
    }

    fn message(&self) -> String {
        let connected = self
            .statuses
            .values()
            .filter(|s| s.status == ConnectionState::Connected)
            .count();
        let failed = self.statuses.len() - connected;
        if failed == 0 {
            format!("All {connected} tool providers connected.")
        } else {
            format!(
                "{connected} of {} tool providers connected, {failed} failed.",
                self.statuses.len()
            )
        }
    }
}

#[async_trait]
impl CallFunctionTool for CheckProvidersTool {
    fn descriptor(&self) -> Tool {
        Tool {
            name: CHECK_PROVIDERS_TOOL.to_string(),
            description: "Reports the connection status of every configured tool provider. \
                          Call it when an expected tool is unavailable."
                .to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _args: Value) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::ok(json!({
            "message": self.message(),
            "statuses": self.statuses,
            "totalToolCount": self.total_tool_count,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::mcp::client::MockProviderConnector;
    use crate::mcp::config::ProviderAuth;
    use crate::tools::test_tools::EchoTool;

    fn provider(name: Option<&str>, url: &str) -> ToolProviderConfig {
        ToolProviderConfig {
            name: name.map(str::to_string),
            url: url.to_string(),
            auth: ProviderAuth {
                header_name: "X-Api-Key".into(),
                value: "k".into(),
            },
        }
    }

    fn echo_tools(names: &[&str]) -> Vec<Arc<dyn CallFunctionTool>> {
        names
            .iter()
            .map(|n| Arc::new(EchoTool { name: n.to_string() }) as Arc<dyn CallFunctionTool>)
            .collect()
    }

    /// Connector where every url containing "down" fails and the rest expose `search` + `fetch`.
    fn connector() -> MockProviderConnector {
        let mut mock = MockProviderConnector::new();
        mock.expect_connect().returning(|_, cfg| {
            if cfg.url.contains("down") {
                Err(ProviderError::Connect {
                    url: cfg.url.clone(),
                    reason: "connection refused".into(),
                })
            } else {
                Ok(echo_tools(&["search", "fetch"]))
            }
        });
        mock
    }

    #[tokio::test]
    async fn failures_are_recorded_without_aborting() {
        let configs = vec![
            provider(Some("docs"), "https://docs.example.com/mcp"),
            provider(None, "https://down.example.com/mcp"),
            provider(Some("links"), "https://links.example.com/mcp"),
            provider(None, "https://down-again.example.com/mcp"),
        ];

        let (tools, statuses) = initialize(&configs, true, &connector()).await;

        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses["docs"].status, ConnectionState::Connected);
        assert_eq!(statuses["docs"].tool_count, Some(2));
        assert_eq!(statuses["server2"].status, ConnectionState::Failed);
        assert!(statuses["server2"].error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(statuses["server4"].status, ConnectionState::Failed);

        let names: Vec<_> = tools.names().collect();
        assert_eq!(names, ["docs_fetch", "docs_search", "links_fetch", "links_search"]);
    }

    #[tokio::test]
    async fn same_tool_name_across_providers_stays_distinct() {
        let configs = vec![
            provider(Some("github"), "https://gh.example.com/mcp"),
            provider(Some("jira"), "https://jira.example.com/mcp"),
        ];
        let (tools, _) = initialize(&configs, true, &connector()).await;

        assert!(tools.contains("github_search"));
        assert!(tools.contains("jira_search"));
        assert_eq!(tools.get("jira_search").unwrap().descriptor().name, "jira_search");
    }

    #[tokio::test]
    async fn duplicate_provider_names_get_a_suffix() {
        let configs = vec![
            provider(Some("short.io"), "https://a.example.com/mcp"),
            provider(Some("short-io"), "https://b.example.com/mcp"),
        ];
        let (tools, statuses) = initialize(&configs, true, &connector()).await;

        assert_eq!(statuses.keys().collect::<Vec<_>>(), ["short_io", "short_io_2"]);
        assert!(tools.contains("short_io_search"));
        assert!(tools.contains("short_io_2_search"));
    }

    #[tokio::test]
    async fn diagnostic_tool_presence() {
        let configs = vec![provider(Some("docs"), "https://docs.example.com/mcp")];

        let (tools, _) = initialize(&configs, false, &connector()).await;
        assert!(tools.contains(CHECK_PROVIDERS_TOOL));

        let (tools, _) = initialize(&configs, true, &connector()).await;
        assert!(!tools.contains(CHECK_PROVIDERS_TOOL));

        let (tools, statuses) = initialize(&[], false, &connector()).await;
        assert!(tools.is_empty());
        assert!(statuses.is_empty());
    }

    #[tokio::test]
    async fn diagnostic_tool_reports_snapshot() {
        let configs = vec![
            provider(Some("docs"), "https://docs.example.com/mcp"),
            provider(None, "https://down.example.com/mcp"),
        ];
        let (tools, _) = initialize(&configs, false, &connector()).await;

        let out = tools
            .get(CHECK_PROVIDERS_TOOL)
            .unwrap()
            .call(json!({}))
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content["totalToolCount"], 2);
        assert_eq!(out.content["statuses"]["docs"]["status"], "connected");
        assert_eq!(out.content["statuses"]["docs"]["toolCount"], 2);
        assert_eq!(out.content["statuses"]["server2"]["status"], "failed");
        assert_eq!(out.content["message"], "1 of 2 tool providers connected, 1 failed.");
    }
}
