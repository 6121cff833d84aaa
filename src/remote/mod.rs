// Remote tool client boundary: OAuth-aware connection + JSON-RPC tool calls

pub mod client;
pub mod oauth;

pub use client::{ToolClient, ToolInfo};
pub use oauth::OAuthProvider;
