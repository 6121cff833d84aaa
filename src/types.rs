use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Identity of one user's connection to one backend service.
///
/// A value-typed key: user ids come from the chat surface and may contain
/// arbitrary characters, so they are never concatenated into a single
/// delimited string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub user: String,
    pub service: String,
}

impl ClientKey {
    pub fn new(user: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            service: service.into(),
        }
    }
}

/// Opaque routing handle for the chat surface. Captured when a login flow is
/// registered and carried through untouched, so the completion notification
/// lands where the login started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

impl ChatContext {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread: None,
        }
    }
}

/// OAuth token set for one (user, service) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
}

impl OAuthTokens {
    /// Whether the access token is expired or will expire within
    /// `buffer_secs`. Tokens without an expiry never expire.
    pub fn is_expired(&self, buffer_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - buffer_secs < Utc::now().timestamp(),
            None => false,
        }
    }
}

/// Dynamically registered OAuth client identity for one (user, service)
/// pair. Stored separately from tokens: a registration outlives token
/// refresh and revocation cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
}
