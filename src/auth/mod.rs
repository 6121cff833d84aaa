// Login flow coordination and credential provisioning

pub mod flow;
pub mod pkce;
pub mod provider;

pub use flow::{AuthEventHandler, CallbackEvent, FlowCoordinator};
pub use provider::CredentialProvider;
