use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use reqwest::header::HeaderMap;
use rmcp::model::ClientInfo;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use std::sync::Arc;

use super::adapter::McpToolAdapter;
use super::config::ToolProviderConfig;
use crate::error::ProviderError;
use crate::tools::CallFunctionTool;

/// Opens a connection to a tool provider and returns its tools under provider-local names.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        provider: &str,
        config: &ToolProviderConfig,
    ) -> Result<Vec<Arc<dyn CallFunctionTool>>, ProviderError>;
}

/// Connects over the MCP streamable-HTTP transport, sending the configured auth header
/// with every request.
#[derive(Debug, Default, Clone)]
pub struct HttpProviderConnector;

impl HttpProviderConnector {
    pub fn new() -> Self {
        Self
    }
}

fn auth_headers(config: &ToolProviderConfig) -> Result<HeaderMap, ProviderError> {
    let header = &config.auth.header_name;
    let name = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
        ProviderError::InvalidHeader {
            header: header.clone(),
            reason: e.to_string(),
        }
    })?;
    let value =
        HeaderValue::from_str(&config.auth.value).map_err(|e| ProviderError::InvalidHeader {
            header: header.clone(),
            reason: e.to_string(),
        })?;

    let mut map = HeaderMap::new();
    map.insert(name, value);
    Ok(map)
}

#[async_trait]
impl ProviderConnector for HttpProviderConnector {
    async fn connect(
        &self,
        provider: &str,
        config: &ToolProviderConfig,
    ) -> Result<Vec<Arc<dyn CallFunctionTool>>, ProviderError> {
        let client = reqwest::ClientBuilder::new()
            .default_headers(auth_headers(config)?)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        let transport = StreamableHttpClientTransport::with_client(
            client,
            StreamableHttpClientTransportConfig::with_uri(config.url.clone()),
        );

        let running = ClientInfo::default()
            .serve(transport)
            .await
            .map_err(|e| ProviderError::Connect {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;
        tracing::trace!(provider, peer = ?running.peer_info(), "connected to tool provider");

        let listed = running
            .list_all_tools()
            .await
            .map_err(|e| ProviderError::ListTools {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        let session = Arc::new(running);
        Ok(listed
            .into_iter()
            .map(|tool| {
                Arc::new(McpToolAdapter::new(provider, tool, session.clone()))
                    as Arc<dyn CallFunctionTool>
            })
            .collect())
    }
}
