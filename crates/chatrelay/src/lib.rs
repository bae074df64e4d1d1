//! Streaming chat relay.
//!
//! Accepts chat requests from an API front door, routes them to an LLM backend together
//! with the tools of every configured MCP tool provider, and streams the model output back
//! as Server-Sent Events.
//!
//! # Architecture
//! - [`mcp`]: tool provider connections and the aggregated, namespaced toolset
//! - [`prompt`]: system prompt assembly with optional session context
//! - [`engine`]: the multi-step chat turn over a [`chat::ChatProvider`]
//! - [`router`]: envelope normalization, validation and path dispatch
//! - [`transport`] and [`handler`]: SSE framing and the lazily-built request entry point

/// Identity of the caller
pub mod auth;

/// Message, tool and streaming types shared by the engine and the model backends
pub mod chat;

pub mod config;

pub mod engine;

/// Error types and handling
pub mod error;

pub mod events;

pub mod handler;

pub mod mcp;

pub mod prompt;

/// Model backends
pub mod providers;

pub mod router;

pub mod tools;

pub mod transport;

pub use auth::{AuthContext, AuthExtractor, ClaimsAuthExtractor};
pub use config::{ChatEngineConfig, ChatSecrets, GenerationPolicy};
pub use engine::ChatEngine;
pub use error::{ChatError, ConfigError, ModelError, ProviderError};
pub use events::{EventStream, StreamEvent};
pub use handler::{HandlerOutcome, StreamHandler};
pub use prompt::{ContextLookup, PromptBuilder};
pub use router::{ChatController, ChatRouter, InboundRequest, RequestEnvelope};
