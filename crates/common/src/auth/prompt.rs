//! Console presentation of the authorization URL.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::traits::AuthorizationPrompt;

/// Opens the system browser (when allowed), echoes the URL to stderr for
/// headless use, and optionally reads a pasted code from stdin.
#[derive(Debug, Clone, Copy)]
pub struct ConsolePrompt {
    open_browser: bool,
    interactive: bool,
}

impl ConsolePrompt {
    /// Prompt that may launch a browser and may read stdin.
    #[must_use]
    pub fn new(open_browser: bool, interactive: bool) -> Self {
        Self { open_browser, interactive }
    }
}

#[async_trait]
impl AuthorizationPrompt for ConsolePrompt {
    async fn present(&self, provider: &str, url: &str) {
        let mut stderr = std::io::stderr();
        let _ = writeln!(stderr, "Authorize {provider} by visiting:\n\n  {url}\n");

        if self.open_browser {
            match webbrowser::open(url) {
                Ok(()) => info!(provider = %provider, "opened authorization URL in browser"),
                Err(err) => warn!(provider = %provider, error = %err, "could not open browser; use the printed URL"),
            }
        }
    }

    async fn read_code(&self, provider: &str) -> Option<String> {
        if !self.interactive {
            debug!(provider = %provider, "non-interactive; not prompting for a code");
            return None;
        }

        let label = provider.to_string();
        let line = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "Paste the authorization code or redirect URL for {label}: ");
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok().map(|_| line)
        })
        .await
        .ok()
        .flatten()?;

        let trimmed = line.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}
