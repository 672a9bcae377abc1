//! Integration tests for the auth flow
//!
//! Drives `AuthManager` end to end against a wiremock token endpoint with the
//! real HTTP exchanger, encrypted token cache, and loopback listener.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tempfile::TempDir;
use tradeauth_common::auth::{
    AuthManager, AuthSettings, AuthorizationPrompt, HttpTokenExchanger, LoginOutcome,
    ProviderConfig,
};
use tradeauth_common::{AuthError, CryptoBox};
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Prompt playing the user: optionally follows the authorization URL by
/// firing the redirect at the loopback listener, optionally pastes a code.
#[derive(Default)]
struct BrowserPrompt {
    redirect_code: Option<String>,
    pasted: Mutex<Option<String>>,
    presented: Mutex<Vec<String>>,
}

#[async_trait]
impl AuthorizationPrompt for BrowserPrompt {
    async fn present(&self, _provider: &str, url: &str) {
        self.presented.lock().push(url.to_string());
        let Some(code) = self.redirect_code.clone() else { return };

        let params: HashMap<String, String> =
            Url::parse(url).expect("authorize url").query_pairs().into_owned().collect();
        let target = format!(
            "{}?code={}&state={}",
            params["redirect_uri"], code, params["state"]
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = http().get(target).send().await;
        });
    }

    async fn read_code(&self, _provider: &str) -> Option<String> {
        self.pasted.lock().take()
    }
}

fn http() -> Client {
    Client::builder().no_proxy().build().expect("client")
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

fn settings(dir: &TempDir, server: &MockServer, redirect_uri: String) -> AuthSettings {
    AuthSettings {
        environment: "test".into(),
        cache_root: dir.path().to_path_buf(),
        encryption_key: Some(CryptoBox::generate_encoded_key()),
        open_browser: false,
        callback_timeout: Duration::from_secs(5),
        provider: ProviderConfig {
            client_id: "client-123".into(),
            client_secret: Some("secret".into()),
            authorize_url: format!("{}/authorize", server.uri()),
            token_url: format!("{}/token", server.uri()),
            redirect_uri,
            scope: "read".into(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn manager(settings: AuthSettings, prompt: Arc<BrowserPrompt>) -> AuthManager {
    AuthManager::new(settings, Arc::new(HttpTokenExchanger::with_client(http())), prompt)
}

fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}

/// Validates the full browser flow through the loopback listener.
///
/// Assertions:
/// - The redirect is captured and the code exchanged with its verifier.
/// - Tokens land in the encrypted cache and pending state is cleared.
#[tokio::test(flavor = "multi_thread")]
async fn loopback_login_exchanges_code_with_verifier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=browser-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"))))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let redirect = format!("http://127.0.0.1:{}/callback", free_port());
    let prompt = Arc::new(BrowserPrompt { redirect_code: Some("browser-code".into()), ..Default::default() });
    let manager = manager(settings(&dir, &server, redirect), prompt.clone());

    assert_eq!(manager.login("default").await.expect("login"), LoginOutcome::Authorized);
    assert_eq!(manager.get_access_token("default").await.expect("token"), "at-1");
    assert!(manager.pending_store().get("default").is_none());
    assert_eq!(prompt.presented.lock().len(), 1);

    let raw = std::fs::read(manager.token_store().path()).expect("cache file");
    assert!(!String::from_utf8_lossy(&raw).contains("at-1"));
}

/// Validates that a forged callback state never reaches the token endpoint.
#[tokio::test(flavor = "multi_thread")]
async fn forged_state_is_rejected_before_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let manager = manager(
        settings(&dir, &server, "https://app.example.com/callback".into()),
        Arc::new(BrowserPrompt::default()),
    );
    let request = manager.authorization_url("default").expect("url");

    let err = manager.handle_callback("code", "attacker-state", "default").await.expect_err("csrf");
    assert!(matches!(err, AuthError::StateMismatch { .. }));

    manager.handle_callback("code", &request.state, "default").await.expect("genuine callback");
}

/// Validates refresh-token rotation through the HTTP exchanger.
///
/// Assertions:
/// - The first refresh sends the original refresh token.
/// - The rotated refresh token is the one sent next time.
#[tokio::test(flavor = "multi_thread")]
async fn refresh_rotation_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-0", Some("rt-0"))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("refresh_token=rt-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-1", Some("rt-1"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at-2", None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let mut settings = settings(&dir, &server, "https://app.example.com/callback".into());
    settings.manual_code = Some("oob".into());
    let manager = manager(settings, Arc::new(BrowserPrompt::default()));
    manager.login("default").await.expect("login");

    let first = manager.refresh("default").await.expect("first refresh");
    assert_eq!(first.access_token, "at-1");
    assert_eq!(first.refresh_token.as_deref(), Some("rt-1"));

    let second = manager.refresh("default").await.expect("second refresh");
    assert_eq!(second.access_token, "at-2");
    assert_eq!(second.refresh_token.as_deref(), Some("rt-1"));
}

/// Validates recovery from a corrupted cache file.
///
/// Assertions:
/// - `get_access_token` reports `AuthRequired`, not a crash.
/// - A later login overwrites the file with a readable cache.
#[tokio::test(flavor = "multi_thread")]
async fn corrupted_cache_recovers_after_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", Some("rt"))))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let mut settings = settings(&dir, &server, "https://app.example.com/callback".into());
    settings.manual_code = Some("oob".into());
    let cache_path = settings.token_cache_path();
    std::fs::create_dir_all(cache_path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&cache_path, b"garbage bytes that are neither JSON nor ciphertext").expect("write");

    let manager = manager(settings, Arc::new(BrowserPrompt::default()));
    assert!(matches!(
        manager.get_access_token("default").await,
        Err(AuthError::AuthRequired { .. })
    ));

    manager.login("default").await.expect("login");
    assert_eq!(manager.get_access_token("default").await.expect("token"), "fresh");
}

/// Validates that an unanswered loopback listener falls back to the pasted
/// code within the configured timeout.
#[tokio::test(flavor = "multi_thread")]
async fn capture_timeout_falls_back_to_pasted_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("code=pasted-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let mut settings =
        settings(&dir, &server, format!("http://127.0.0.1:{}/callback", free_port()));
    settings.callback_timeout = Duration::from_millis(300);
    let prompt = Arc::new(BrowserPrompt {
        pasted: Mutex::new(Some("pasted-code".into())),
        ..Default::default()
    });
    let manager = manager(settings, prompt);

    let outcome = tokio::time::timeout(Duration::from_secs(10), manager.login("default"))
        .await
        .expect("login must not hang");
    assert_eq!(outcome.expect("login"), LoginOutcome::Authorized);
}

/// Validates that a redirect port already in use falls through to the pasted
/// code instead of failing or hanging.
#[tokio::test(flavor = "multi_thread")]
async fn occupied_redirect_port_falls_back_to_pasted_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("code=pasted-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("at", None)))
        .expect(1)
        .mount(&server)
        .await;

    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("hold port");
    let port = occupied.local_addr().expect("addr").port();

    let dir = TempDir::new().expect("tempdir");
    let mut settings = settings(&dir, &server, format!("http://127.0.0.1:{port}/callback"));
    settings.callback_timeout = Duration::from_secs(30);
    let prompt = Arc::new(BrowserPrompt {
        pasted: Mutex::new(Some("pasted-code".into())),
        ..Default::default()
    });
    let manager = manager(settings, prompt.clone());

    let outcome = tokio::time::timeout(Duration::from_secs(5), manager.login("default"))
        .await
        .expect("bind failure must not wait for the callback timeout");
    assert_eq!(outcome.expect("login"), LoginOutcome::Authorized);
    assert_eq!(prompt.presented.lock().len(), 1);
    drop(occupied);
}

/// Validates simulate mode end to end: no request reaches the endpoint.
#[tokio::test(flavor = "multi_thread")]
async fn simulate_mode_makes_no_network_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("tempdir");
    let mut settings = settings(&dir, &server, "https://app.example.com/callback".into());
    settings.simulate = true;
    let manager = manager(settings, Arc::new(BrowserPrompt::default()));

    assert_eq!(manager.login("default").await.expect("login"), LoginOutcome::Simulated);
    let record = manager.token_store().get("default").expect("record");
    assert_eq!(record.token_type, "Bearer");
    assert!(record.access_token.starts_with("simulated"));
}
