//! Model backends implementing [`crate::chat::ChatProvider`].

pub mod anthropic;

pub use anthropic::AnthropicProvider;
