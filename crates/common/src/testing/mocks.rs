//! Test doubles for the auth manager's injected collaborators.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::auth::client::ExchangeError;
use crate::auth::traits::{AuthorizationPrompt, TokenExchanger};
use crate::auth::types::{OAuthErrorBody, TokenResponse};

/// One token endpoint call seen by [`MockTokenExchanger`].
#[derive(Debug, Clone)]
pub struct RecordedExchange {
    /// Endpoint the form was posted to.
    pub token_url: String,
    /// Form fields in request order.
    pub form: Vec<(String, String)>,
}

impl RecordedExchange {
    /// Value of form field `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

enum MockReply {
    Token(TokenResponse),
    Reject { status: u16, error: String },
}

/// Mock token endpoint that replays scripted replies without network calls.
///
/// Replies are consumed in order; an exhausted script answers 500.
#[derive(Clone, Default)]
pub struct MockTokenExchanger {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<RecordedExchange>>>,
    delay: Option<Duration>,
}

impl std::fmt::Debug for MockTokenExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTokenExchanger")
            .field("pending_replies", &self.replies.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl MockTokenExchanger {
    /// Create a mock with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful reply.
    pub fn push_token(&self, response: TokenResponse) {
        self.replies.lock().push_back(MockReply::Token(response));
    }

    /// Queue an RFC 6749 error reply with `status`.
    pub fn push_rejection(&self, status: u16, error: &str) {
        self.replies.lock().push_back(MockReply::Reject { status, error: error.to_string() });
    }

    /// Calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedExchange> {
        self.calls.lock().clone()
    }

    /// Number of exchanges made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TokenExchanger for MockTokenExchanger {
    async fn exchange(
        &self,
        token_url: &str,
        form: &[(String, String)],
    ) -> Result<TokenResponse, ExchangeError> {
        self.calls
            .lock()
            .push(RecordedExchange { token_url: token_url.to_string(), form: form.to_vec() });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(MockReply::Token(response)) => Ok(response),
            Some(MockReply::Reject { status, error }) => Err(ExchangeError::Rejected {
                status,
                detail: error.clone(),
                error: Some(OAuthErrorBody { error, error_description: None }),
            }),
            None => Err(ExchangeError::Rejected {
                status: 500,
                error: None,
                detail: "no scripted reply".to_string(),
            }),
        }
    }
}

type PresentHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Prompt that records presented URLs and returns a scripted pasted code.
///
/// An `on_present` hook can play the browser, e.g. by firing the redirect at
/// a loopback listener.
#[derive(Clone, Default)]
pub struct ScriptedPrompt {
    code: Arc<Mutex<Option<String>>>,
    presented: Arc<Mutex<Vec<String>>>,
    on_present: Option<PresentHook>,
}

impl std::fmt::Debug for ScriptedPrompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPrompt")
            .field("presented", &self.presented.lock().len())
            .field("has_hook", &self.on_present.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptedPrompt {
    /// Prompt that presents silently and has no code to give.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `code` (once) from `read_code`.
    #[must_use]
    pub fn with_code(self, code: impl Into<String>) -> Self {
        *self.code.lock() = Some(code.into());
        self
    }

    /// Run `hook` with each presented URL.
    #[must_use]
    pub fn on_present(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_present = Some(Arc::new(hook));
        self
    }

    /// URLs presented so far.
    #[must_use]
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }
}

#[async_trait]
impl AuthorizationPrompt for ScriptedPrompt {
    async fn present(&self, _provider: &str, url: &str) {
        self.presented.lock().push(url.to_string());
        if let Some(hook) = &self.on_present {
            hook(url);
        }
    }

    async fn read_code(&self, _provider: &str) -> Option<String> {
        self.code.lock().take()
    }
}
