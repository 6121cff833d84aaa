//! OAuth machinery at the remote-tool boundary: the capability contract the
//! client requires from its host, RFC 7591 dynamic client registration,
//! PKCE-bound authorization URLs, and the code-for-token exchange.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::types::{ClientRegistration, OAuthTokens};

/// Capability set an OAuth-aware tool client requires from its host.
///
/// Implementations confine side effects to credential storage; the client
/// decides when each capability is exercised. The host never performs an
/// interactive step itself: `begin_authorization` hands the URL back so a
/// human-facing layer can deliver it.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Redirect URI the authorization server sends the browser back to.
    fn redirect_uri(&self) -> &str;

    /// Correlation state for the authorization request: the externally
    /// supplied flow state when one is known, otherwise freshly generated.
    fn flow_state(&self) -> String;

    async fn client_registration(&self) -> Option<ClientRegistration>;
    async fn save_client_registration(&self, registration: ClientRegistration);

    async fn tokens(&self) -> Option<OAuthTokens>;
    async fn save_tokens(&self, tokens: OAuthTokens);

    async fn code_verifier(&self) -> Option<String>;
    async fn save_code_verifier(&self, verifier: String);

    /// Record the authorization URL instead of opening anything.
    async fn begin_authorization(&self, url: String);
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    redirect_uris: Vec<&'a str>,
    grant_types: Vec<&'static str>,
    response_types: Vec<&'static str>,
    token_endpoint_auth_method: &'static str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    client_id: String,
    client_secret: Option<String>,
    client_id_issued_at: Option<i64>,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl From<TokenEndpointResponse> for OAuthTokens {
    fn from(response: TokenEndpointResponse) -> Self {
        OAuthTokens {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: response
                .expires_in
                .map(|secs| Utc::now().timestamp() + secs as i64),
        }
    }
}

/// Register a fresh OAuth client with the service (RFC 7591).
pub async fn register_client(
    http: &reqwest::Client,
    service: &ServiceConfig,
    client_name: &str,
    redirect_uri: &str,
) -> Result<ClientRegistration> {
    let registration_endpoint =
        service
            .registration_endpoint
            .as_deref()
            .ok_or_else(|| Error::RegistrationFailed {
                reason: "service has no registration endpoint and no stored client".to_string(),
            })?;

    let request = RegistrationRequest {
        client_name,
        redirect_uris: vec![redirect_uri],
        grant_types: vec!["authorization_code", "refresh_token"],
        response_types: vec!["code"],
        token_endpoint_auth_method: "none",
    };

    let res = http
        .post(registration_endpoint)
        .json(&request)
        .send()
        .await?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(Error::RegistrationFailed {
            reason: format!("{}: {}", status, body),
        });
    }

    let response: RegistrationResponse = res.json().await?;
    debug!(client_id = %response.client_id, "registered OAuth client");

    Ok(ClientRegistration {
        client_id: response.client_id,
        client_secret: response.client_secret,
        issued_at: response.client_id_issued_at,
    })
}

/// Build the authorization-code + PKCE (S256) authorization URL.
pub fn authorization_url(
    service: &ServiceConfig,
    registration: &ClientRegistration,
    code_challenge: &str,
    state: &str,
    redirect_uri: &str,
) -> String {
    let mut url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state={}",
        service.authorization_endpoint,
        urlencoding::encode(&registration.client_id),
        urlencoding::encode(redirect_uri),
        code_challenge,
        state,
    );
    if let Some(scopes) = &service.scopes {
        url.push_str(&format!("&scope={}", urlencoding::encode(scopes)));
    }
    url
}

/// Exchange an authorization code for tokens. The PKCE verifier binds the
/// code to the client that requested it.
pub async fn exchange_code(
    http: &reqwest::Client,
    service: &ServiceConfig,
    registration: &ClientRegistration,
    code: &str,
    code_verifier: &str,
    redirect_uri: &str,
) -> Result<OAuthTokens> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", registration.client_id.as_str()),
        ("code_verifier", code_verifier),
    ];
    if let Some(secret) = &registration.client_secret {
        form.push(("client_secret", secret));
    }

    let res = http.post(&service.token_endpoint).form(&form).send().await?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(Error::ExchangeFailed {
            reason: format!("{}: {}", status, body),
        });
    }

    let response: TokenEndpointResponse = res.json().await?;
    Ok(response.into())
}

/// Refresh an access token using the refresh token.
pub async fn refresh_tokens(
    http: &reqwest::Client,
    service: &ServiceConfig,
    registration: &ClientRegistration,
    refresh_token: &str,
) -> Result<OAuthTokens> {
    let mut form = vec![
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", registration.client_id.as_str()),
    ];
    if let Some(secret) = &registration.client_secret {
        form.push(("client_secret", secret));
    }

    let res = http.post(&service.token_endpoint).form(&form).send().await?;

    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(Error::ExchangeFailed {
            reason: format!("refresh: {}: {}", status, body),
        });
    }

    let response: TokenEndpointResponse = res.json().await?;
    Ok(response.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with(token_endpoint: &str, registration_endpoint: Option<&str>) -> ServiceConfig {
        ServiceConfig {
            enabled: true,
            endpoint: "https://tools.example.com/rpc".to_string(),
            authorization_endpoint: "https://tools.example.com/oauth/authorize".to_string(),
            token_endpoint: token_endpoint.to_string(),
            registration_endpoint: registration_endpoint.map(|s| s.to_string()),
            scopes: Some("tools:invoke".to_string()),
        }
    }

    fn registration() -> ClientRegistration {
        ClientRegistration {
            client_id: "client-1".to_string(),
            client_secret: None,
            issued_at: None,
        }
    }

    #[test]
    fn test_authorization_url_contains_pkce_and_state() {
        let service = service_with("https://tools.example.com/oauth/token", None);
        let url = authorization_url(
            &service,
            &registration(),
            "challenge-abc",
            "state-xyz",
            "https://bot.example.com/callback",
        );

        assert!(url.starts_with("https://tools.example.com/oauth/authorize?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("code_challenge=challenge-abc"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-xyz"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fbot.example.com%2Fcallback"));
        assert!(url.contains("scope=tools%3Ainvoke"));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let service = service_with(&format!("{}/oauth/token", server.url()), None);
        let http = reqwest::Client::new();

        let tokens = exchange_code(
            &http,
            &service,
            &registration(),
            "code-1",
            "verifier-1",
            "https://bot.example.com/callback",
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        assert!(tokens.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_exchange_code_failure_is_exchange_failed() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let service = service_with(&format!("{}/oauth/token", server.url()), None);
        let http = reqwest::Client::new();

        let err = exchange_code(
            &http,
            &service,
            &registration(),
            "bad-code",
            "verifier-1",
            "https://bot.example.com/callback",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::ExchangeFailed { .. }));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_register_client_roundtrip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/register")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"client_id":"dyn-1","client_secret":"s3cret","client_id_issued_at":1700000000}"#)
            .create_async()
            .await;

        let service = service_with(
            "https://tools.example.com/oauth/token",
            Some(&format!("{}/oauth/register", server.url())),
        );
        let http = reqwest::Client::new();

        let reg = register_client(&http, &service, "janus", "https://bot.example.com/callback")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reg.client_id, "dyn-1");
        assert_eq!(reg.client_secret.as_deref(), Some("s3cret"));
        assert_eq!(reg.issued_at, Some(1700000000));
    }

    #[tokio::test]
    async fn test_register_client_without_endpoint_fails() {
        let service = service_with("https://tools.example.com/oauth/token", None);
        let http = reqwest::Client::new();

        let err = register_client(&http, &service, "janus", "https://bot.example.com/callback")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RegistrationFailed { .. }));
    }
}
