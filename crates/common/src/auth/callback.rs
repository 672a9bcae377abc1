//! Loopback capture of the authorization redirect.
//!
//! When the configured redirect URI points at `localhost`/`127.0.0.1`, a
//! short-lived axum server is bound to that host and port and waits for the
//! browser to be redirected back with `code`/`state`. The server runs on its
//! own task; the result comes back over a oneshot channel awaited with a
//! timeout, and the socket is released once the wait ends.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

/// Time allowed for in-flight responses to drain before the server task is
/// aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// `code`/`state` pair delivered by a redirect, a pasted URL or a callback
/// artifact file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedCallback {
    /// Authorization code as delivered.
    pub code: String,
    /// Echoed `state`; `None` when the channel carried only a code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl std::fmt::Debug for CapturedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedCallback")
            .field("code", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}

/// What the loopback listener received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Redirect carrying an authorization code.
    Code(CapturedCallback),
    /// Redirect carrying `error=` (consent denied, invalid request...).
    Denied {
        /// OAuth error code.
        error: String,
        /// Optional human-readable description.
        description: Option<String>,
    },
}

/// Host, port and path to listen on, if `redirect_uri` is a plain-http
/// loopback address. `https` redirects are not applicable: no TLS is
/// terminated here.
#[must_use]
pub fn loopback_target(redirect_uri: &str) -> Option<(SocketAddr, String)> {
    let url = Url::parse(redirect_uri).ok()?;
    if url.scheme() != "http" {
        return None;
    }
    let ip = match url.host()? {
        Host::Domain(domain) if domain.eq_ignore_ascii_case("localhost") => {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Host::Ipv4(ip) if ip.is_loopback() => IpAddr::V4(ip),
        Host::Ipv6(ip) if ip.is_loopback() => IpAddr::V6(ip),
        _ => return None,
    };
    let port = url.port_or_known_default()?;
    Some((SocketAddr::new(ip, port), url.path().to_string()))
}

/// Whether `redirect_uri` allows local capture.
#[must_use]
pub fn is_loopback_redirect(redirect_uri: &str) -> bool {
    loopback_target(redirect_uri).is_some()
}

/// Extract a code from user-supplied text.
///
/// Accepts a full redirect URL, a bare query string (`code=..&state=..`), a
/// `{"code": .., "state": ..}` JSON artifact, or a bare code. Redirects that
/// carry `error=` or no code yield `None`.
#[must_use]
pub fn parse_callback_input(input: &str) -> Option<CapturedCallback> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.starts_with('{') {
        return serde_json::from_str::<CapturedCallback>(input)
            .ok()
            .filter(|captured| !captured.code.trim().is_empty());
    }

    let query = if input.contains("://") {
        Url::parse(input).ok()?.query()?.to_string()
    } else if input.contains("code=") || input.contains("error=") {
        input.trim_start_matches('?').to_string()
    } else {
        return Some(CapturedCallback { code: input.to_string(), state: None });
    };

    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if params.contains_key("error") {
        return None;
    }
    let code = params.get("code").filter(|c| !c.is_empty())?.clone();
    Some(CapturedCallback { code, state: params.get("state").cloned() })
}

type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// Running loopback callback server.
///
/// Dropping it aborts the server task.
pub struct CallbackListener {
    addr: SocketAddr,
    path: String,
    outcome_rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CallbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackListener")
            .field("addr", &self.addr)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CallbackListener {
    /// Start listening for `redirect_uri`.
    ///
    /// Returns `None` without binding anything when the URI is not a
    /// loopback http address, and `None` (with a warning) when the bind
    /// fails; both mean "fall back to manual entry".
    pub async fn bind(redirect_uri: &str) -> Option<Self> {
        let Some((addr, path)) = loopback_target(redirect_uri) else {
            debug!(redirect_uri = %redirect_uri, "redirect URI is not loopback; local capture not applicable");
            return None;
        };

        if !is_routable_path(&path) {
            warn!(path = %path, "redirect path cannot be served by the callback listener; falling back to manual entry");
            return None;
        }

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(addr = %addr, error = %err, "failed to bind OAuth callback listener; falling back to manual entry");
                return None;
            }
        };
        let addr = listener.local_addr().unwrap_or(addr);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let slot: OutcomeSlot = Arc::new(Mutex::new(Some(outcome_tx)));
        let app = Router::new().route(&path, get(handle_redirect)).with_state(slot);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("OAuth callback server error: {}", err);
            }
        });

        info!(addr = %addr, path = %path, "listening for OAuth redirect");
        Some(Self {
            addr,
            path,
            outcome_rx: Some(outcome_rx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Bound address (the real port when the URI asked for port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Path the server answers on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait up to `timeout` for the redirect, then stop the server.
    ///
    /// `None` on timeout.
    pub async fn wait(mut self, timeout: Duration) -> Option<CallbackOutcome> {
        let outcome = match self.outcome_rx.take() {
            Some(rx) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => Some(outcome),
                Ok(Err(_)) => None,
                Err(_) => {
                    info!(timeout_secs = timeout.as_secs(), "no OAuth redirect received before timeout");
                    None
                }
            },
            None => None,
        };
        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        debug!(addr = %self.addr, "OAuth callback listener stopped");
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

/// Bind, wait up to `timeout`, and return the captured code.
///
/// `None` when local capture is not applicable, the bind failed, the wait
/// timed out, or the provider redirected with an error.
pub async fn try_local_capture(redirect_uri: &str, timeout: Duration) -> Option<CapturedCallback> {
    match CallbackListener::bind(redirect_uri).await?.wait(timeout).await? {
        CallbackOutcome::Code(captured) => Some(captured),
        CallbackOutcome::Denied { error, description } => {
            warn!(error = %error, description = ?description, "authorization redirect carried an error");
            None
        }
    }
}

/// Whether `path` is a literal route: no `:`/`*` segment prefixes and no
/// braces, which the router would read as captures or reject outright.
fn is_routable_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.contains(['{', '}'])
        && !path.split('/').any(|segment| segment.starts_with([':', '*']))
}

fn plain_text(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

async fn handle_redirect(
    State(slot): State<OutcomeSlot>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(error) = params.get("error") {
        deliver(
            &slot,
            CallbackOutcome::Denied {
                error: error.clone(),
                description: params.get("error_description").cloned(),
            },
        );
        return plain_text(
            StatusCode::OK,
            "Authorization was not granted. You can close this window.",
        );
    }

    match params.get("code").filter(|code| !code.is_empty()) {
        Some(code) => {
            deliver(
                &slot,
                CallbackOutcome::Code(CapturedCallback {
                    code: code.clone(),
                    state: params.get("state").cloned(),
                }),
            );
            plain_text(
                StatusCode::OK,
                "Authorization complete. You can close this window and return to the application.",
            )
        }
        None => plain_text(StatusCode::BAD_REQUEST, "Missing authorization code."),
    }
}

fn deliver(slot: &OutcomeSlot, outcome: CallbackOutcome) {
    match slot.lock().take() {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => debug!("ignoring repeated OAuth redirect"),
    }
}
