use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

use crate::error::ConfigError;
use crate::mcp::config::{ProviderAuth, ToolProviderConfig, parse_tool_provider_value};

/// MCP endpoint used when only a Short.io key is configured.
pub const SHORTIO_MCP_URL: &str = "https://ai-assistant.short.io/mcp";

/// Header carrying the key for single-provider secrets.
pub const LEGACY_API_KEY_HEADER: &str = "X-Api-Key";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Limits applied to every chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationPolicy {
    /// Model invocations per turn. Tools requested by the last one still run, but their
    /// results are not sent back to the model.
    pub max_steps: u32,
    pub max_output_tokens: u32,
    /// Extended reasoning budget, or `None` to disable reasoning.
    pub reasoning_budget_tokens: Option<u32>,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_output_tokens: 4096,
            reasoning_budget_tokens: Some(2048),
        }
    }
}

/// Everything a chat engine is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatEngineConfig {
    pub tool_providers: Vec<ToolProviderConfig>,
    pub model: String,
    pub is_production: bool,
    pub policy: GenerationPolicy,
    /// Upper bound on the session context lookup.
    #[serde(with = "millis")]
    pub context_timeout: Duration,
}

impl Default for ChatEngineConfig {
    fn default() -> Self {
        Self {
            tool_providers: Vec::new(),
            model: DEFAULT_MODEL.to_string(),
            is_production: false,
            policy: GenerationPolicy::default(),
            context_timeout: Duration::from_secs(5),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Secret payload holding tool provider credentials.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatSecrets {
    /// JSON array of provider configs, or a string containing one.
    #[serde(rename = "TOOL_PROVIDERS", default)]
    pub tool_providers: Option<Value>,
    #[serde(rename = "MCP_URL", default)]
    pub mcp_url: Option<String>,
    #[serde(rename = "MCP_API_KEY", default)]
    pub mcp_api_key: Option<String>,
    #[serde(rename = "SHORTIO_API_KEY", default)]
    pub shortio_api_key: Option<String>,
}

impl ChatSecrets {
    /// Parses a secret payload. A payload that is itself an array is taken as the provider list.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(list @ Value::Array(_)) => ChatSecrets {
                tool_providers: Some(list),
                ..Default::default()
            },
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                error!(error = %e, "ignoring malformed chat secrets");
                ChatSecrets::default()
            }),
            Err(e) => {
                error!(error = %e, "chat secrets are not valid JSON");
                ChatSecrets::default()
            }
        }
    }

    /// Resolves the provider list, appending the single-provider entry when one is configured.
    pub fn tool_providers(&self) -> Vec<ToolProviderConfig> {
        let mut providers = match self.tool_providers.clone() {
            None => Ok(Vec::new()),
            Some(Value::String(raw)) => serde_json::from_str::<Value>(&raw)
                .map_err(ConfigError::from)
                .and_then(parse_tool_provider_value),
            Some(value) => parse_tool_provider_value(value),
        }
        .unwrap_or_else(|e| {
            error!(error = %e, "ignoring tool provider configuration");
            Vec::new()
        });

        if let Some(legacy) = self.legacy_provider() {
            info!(url = %legacy.url, "adding single-provider configuration");
            providers.push(legacy);
        }
        providers
    }

    fn legacy_provider(&self) -> Option<ToolProviderConfig> {
        let present = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        let shortio = present(&self.shortio_api_key);

        let (name, url) = match present(&self.mcp_url) {
            Some(url) => (None, url),
            None if shortio.is_some() => (Some("shortio".to_string()), SHORTIO_MCP_URL.to_string()),
            None => return None,
        };
        let key = present(&self.mcp_api_key).or(shortio)?;

        Some(ToolProviderConfig {
            name,
            url,
            auth: ProviderAuth {
                header_name: LEGACY_API_KEY_HEADER.to_string(),
                value: key,
            },
        })
    }
}
