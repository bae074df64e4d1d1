//! Remote tool providers reached over the MCP streamable-HTTP transport.

pub mod adapter;
pub mod aggregator;
pub mod client;
pub mod config;
pub mod naming;

pub use aggregator::{
    CHECK_PROVIDERS_TOOL, ConnectionState, ProviderStatuses, ToolProviderStatus, initialize,
};
pub use client::{HttpProviderConnector, ProviderConnector};
pub use config::{ProviderAuth, ToolProviderConfig, parse_tool_providers};
