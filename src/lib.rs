pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod metrics;
pub mod remote;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use clients::ClientManager;
pub use config::Config;
pub use error::{Error, Result};
pub use store::CredentialStore;
pub use types::{ChatContext, ClientKey, ClientRegistration, OAuthTokens};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
