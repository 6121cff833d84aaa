use janus::clients::ClientManager;
use janus::config::{Config, ServiceConfig};
use janus::store::CredentialStore;
use janus::types::OAuthTokens;
use janus::Error;
use std::collections::HashMap;
use std::sync::Arc;

fn config_for(server: &mockito::Server) -> Arc<Config> {
    let mut services = HashMap::new();
    for name in ["calendar", "drive"] {
        services.insert(
            name.to_string(),
            ServiceConfig {
                enabled: true,
                endpoint: format!("{}/rpc", server.url()),
                authorization_endpoint: format!("{}/oauth/authorize", server.url()),
                token_endpoint: format!("{}/oauth/token", server.url()),
                registration_endpoint: Some(format!("{}/oauth/register", server.url())),
                scopes: None,
            },
        );
    }
    Arc::new(Config {
        server: Default::default(),
        oauth: Default::default(),
        services,
    })
}

fn manager(server: &mockito::Server) -> (Arc<ClientManager>, Arc<CredentialStore>) {
    let store = Arc::new(CredentialStore::new());
    let manager = Arc::new(ClientManager::new(config_for(server), store.clone()));
    (manager, store)
}

fn tokens(value: &str) -> OAuthTokens {
    OAuthTokens {
        access_token: value.to_string(),
        refresh_token: None,
        expires_at: None,
    }
}

async fn mock_initialize(server: &mut mockito::Server, hits: usize) -> mockito::Mock {
    server
        .mock("POST", "/rpc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"svc"}}}"#)
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn test_get_client_without_tokens_requires_authentication() {
    let server = mockito::Server::new_async().await;
    let (manager, _store) = manager(&server);

    let err = manager.get_client("u1", "calendar").await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationRequired { service } if service == "calendar"));
    assert_eq!(manager.client_count(), 0);
}

#[tokio::test]
async fn test_get_client_is_cached_per_key() {
    let mut server = mockito::Server::new_async().await;
    let init = mock_initialize(&mut server, 1).await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("at-1"));

    let first = manager.get_client("u1", "calendar").await.unwrap();
    let second = manager.get_client("u1", "calendar").await.unwrap();

    init.assert_async().await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(manager.client_count(), 1);
}

#[tokio::test]
async fn test_concurrent_get_client_builds_one_connection() {
    let mut server = mockito::Server::new_async().await;
    let init = mock_initialize(&mut server, 1).await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("at-1"));

    let (a, b) = tokio::join!(
        manager.get_client("u1", "calendar"),
        manager.get_client("u1", "calendar"),
    );

    init.assert_async().await;
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(manager.client_count(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_fresh_connection() {
    let mut server = mockito::Server::new_async().await;
    let init = mock_initialize(&mut server, 2).await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("at-1"));

    let first = manager.get_client("u1", "calendar").await.unwrap();
    manager.invalidate_client("u1", "calendar");
    assert_eq!(manager.client_count(), 0);

    let second = manager.get_client("u1", "calendar").await.unwrap();
    init.assert_async().await;
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_disconnect_client_evicts_and_closes() {
    let mut server = mockito::Server::new_async().await;
    // initialize + best-effort shutdown
    let _mocks = mock_initialize(&mut server, 2).await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("at-1"));

    manager.get_client("u1", "calendar").await.unwrap();
    manager.disconnect_client("u1", "calendar").await;

    assert_eq!(manager.client_count(), 0);

    // Disconnecting again is a quiet no-op.
    manager.disconnect_client("u1", "calendar").await;
}

#[tokio::test]
async fn test_disconnect_user_closes_all_services() {
    let mut server = mockito::Server::new_async().await;
    // 2 initializes + 2 shutdowns
    let _mocks = mock_initialize(&mut server, 4).await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("at-1"));
    store.save_tokens("u1", "drive", tokens("at-2"));

    manager.get_client("u1", "calendar").await.unwrap();
    manager.get_client("u1", "drive").await.unwrap();
    assert_eq!(manager.client_count(), 2);

    manager.disconnect_user("u1").await;
    assert_eq!(manager.client_count(), 0);
}

#[tokio::test]
async fn test_stale_tokens_reclassified_as_authentication_required() {
    let mut server = mockito::Server::new_async().await;
    // Tokens exist but the service rejects them: the client records an
    // authorization redirect and the manager reports a login is needed.
    let _rpc = server
        .mock("POST", "/rpc")
        .with_status(401)
        .create_async()
        .await;
    let _register = server
        .mock("POST", "/oauth/register")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"client_id":"dyn-1"}"#)
        .create_async()
        .await;

    let (manager, store) = manager(&server);
    store.save_tokens("u1", "calendar", tokens("revoked"));

    let err = manager.get_client("u1", "calendar").await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationRequired { .. }));
    assert!(store.get_pending_auth_url("u1").is_some());
    assert_eq!(manager.client_count(), 0);
}

#[tokio::test]
async fn test_initiate_auth_returns_captured_url() {
    let mut server = mockito::Server::new_async().await;
    let _rpc = server
        .mock("POST", "/rpc")
        .with_status(401)
        .create_async()
        .await;
    let _register = server
        .mock("POST", "/oauth/register")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"client_id":"dyn-1"}"#)
        .create_async()
        .await;

    let (manager, store) = manager(&server);
    let url = manager
        .initiate_auth("u1", "calendar", "state-1")
        .await
        .unwrap()
        .expect("authorization url");

    assert!(url.contains("state=state-1"));
    assert!(url.contains("client_id=dyn-1"));
    assert_eq!(store.get_pending_auth_url("u1").as_deref(), Some(url.as_str()));
    // A failed deliberate attempt caches nothing.
    assert_eq!(manager.client_count(), 0);
}

#[tokio::test]
async fn test_initiate_auth_returns_none_when_already_authenticated() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_initialize(&mut server, 1).await;

    let (manager, store) = manager(&server);
    // The service accepts the connection even though janus held no tokens
    // locally for it; treat the user as authenticated and keep the
    // connection.
    store.save_tokens("u1", "calendar", tokens("at-1"));

    let url = manager
        .initiate_auth("u1", "calendar", "state-1")
        .await
        .unwrap();

    assert!(url.is_none());
    assert_eq!(manager.client_count(), 1);
}

#[tokio::test]
async fn test_unknown_service_is_rejected() {
    let server = mockito::Server::new_async().await;
    let (manager, _store) = manager(&server);

    let err = manager.get_client("u1", "github").await.unwrap_err();
    assert!(matches!(err, Error::UnknownService(_)));

    let err = manager
        .initiate_auth("u1", "github", "state-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownService(_)));
}
