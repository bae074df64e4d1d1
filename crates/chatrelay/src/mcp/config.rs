use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ConfigError;

/// Header-based credentials sent with every request to a tool provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAuth {
    /// HTTP header name, e.g. `Authorization` or `X-Api-Key`.
    pub header_name: String,
    pub value: String,
}

/// One remote tool provider (MCP server reachable over streamable HTTP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProviderConfig {
    /// Namespace for the provider's tools; positional default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    pub auth: ProviderAuth,
}

impl ToolProviderConfig {
    fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.url).map_err(|e| format!("invalid url `{}`: {e}", self.url))?;
        if self.auth.header_name.trim().is_empty() {
            return Err("auth.headerName must not be empty".to_string());
        }
        Ok(())
    }
}

/// Parses a provider configuration payload.
///
/// The payload must be a JSON array. Entries that do not describe a valid provider are
/// skipped with a warning; only a structurally invalid payload is an error.
pub fn parse_tool_providers(raw: &str) -> Result<Vec<ToolProviderConfig>, ConfigError> {
    let value: Value = serde_json::from_str(raw)?;
    parse_tool_provider_value(value)
}

pub fn parse_tool_provider_value(value: Value) -> Result<Vec<ToolProviderConfig>, ConfigError> {
    let entries = match value {
        Value::Array(entries) => entries,
        other => return Err(ConfigError::NotAnArray(json_kind(&other))),
    };

    let mut providers = Vec::with_capacity(entries.len());
    for (position, entry) in entries.into_iter().enumerate() {
        let parsed = serde_json::from_value::<ToolProviderConfig>(entry)
            .map_err(|e| e.to_string())
            .and_then(|cfg| cfg.validate().map(|_| cfg));
        match parsed {
            Ok(cfg) => providers.push(cfg),
            Err(reason) => {
                warn!(position, %reason, "skipping malformed tool provider entry");
            }
        }
    }
    Ok(providers)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_entries_keep_only_well_formed_ones() {
        let raw = r#"[
            {"name": "docs", "url": "https://docs.example.com/mcp", "auth": {"headerName": "X-Api-Key", "value": "k1"}},
            {"url": "https://no-auth.example.com/mcp"},
            "not an object",
            {"url": "not a url", "auth": {"headerName": "X-Api-Key", "value": "k"}},
            {"url": "https://anon.example.com/mcp", "auth": {"headerName": "Authorization", "value": "Bearer t"}},
            {"url": "https://blank.example.com/mcp", "auth": {"headerName": " ", "value": "k"}}
        ]"#;

        let providers = parse_tool_providers(raw).unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name.as_deref(), Some("docs"));
        assert_eq!(providers[1].name, None);
        assert_eq!(providers[1].auth.header_name, "Authorization");
    }

    #[test]
    fn non_array_payload_is_a_configuration_error() {
        assert!(matches!(
            parse_tool_providers(r#"{"url": "https://x"}"#),
            Err(ConfigError::NotAnArray("an object"))
        ));
        assert!(matches!(parse_tool_providers("[{"), Err(ConfigError::Json(_))));
    }
}
