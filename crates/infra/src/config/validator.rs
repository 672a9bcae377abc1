//! Redirect URI hygiene checks
//!
//! The authorization server only redirects to URIs registered for the client,
//! so a configured `redirect_uri` that is not on the allowlist fails at the
//! consent screen rather than here. The loader runs these checks up front and
//! logs the findings; none of them block loading.

use std::fmt;

use url::Url;

/// A problem found with a redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectFinding {
    /// No redirect URI is configured.
    Missing,
    /// The value is not an absolute URL.
    Unparseable(String),
    /// Plain `http` to a host that is not loopback.
    InsecureScheme(String),
    /// Not an exact match for any registered URI.
    NotRegistered(String),
}

impl fmt::Display for RedirectFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no redirect URI configured"),
            Self::Unparseable(uri) => write!(f, "redirect URI is not a valid URL: {uri}"),
            Self::InsecureScheme(uri) => {
                write!(f, "redirect URI must use https unless it targets loopback: {uri}")
            }
            Self::NotRegistered(uri) => {
                write!(f, "redirect URI is not in the registered allowlist: {uri}")
            }
        }
    }
}

/// Checks a redirect URI before it is sent to the authorization server.
pub trait RedirectValidator: Send + Sync {
    /// Every finding for `uri`; empty means the URI looks usable.
    fn validate(&self, uri: &str) -> Vec<RedirectFinding>;
}

/// Requires `https` (or loopback `http`) and an exact allowlist match.
///
/// An empty allowlist skips the membership check.
#[derive(Debug, Clone, Default)]
pub struct RegisteredRedirectValidator {
    registered: Vec<String>,
}

impl RegisteredRedirectValidator {
    /// Validator for the given registered URIs.
    #[must_use]
    pub fn new(registered: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { registered: registered.into_iter().map(Into::into).collect() }
    }

    /// The allowlist as given.
    #[must_use]
    pub fn registered(&self) -> &[String] {
        &self.registered
    }

    /// `true` when `uri` is on the allowlist, compared exactly.
    #[must_use]
    pub fn is_registered(&self, uri: &str) -> bool {
        self.registered.iter().any(|r| r == uri)
    }
}

impl RedirectValidator for RegisteredRedirectValidator {
    fn validate(&self, uri: &str) -> Vec<RedirectFinding> {
        let uri = uri.trim();
        if uri.is_empty() {
            return vec![RedirectFinding::Missing];
        }

        let mut findings = Vec::new();
        match Url::parse(uri) {
            Ok(parsed) => {
                if parsed.scheme() != "https" && !is_loopback_http(&parsed) {
                    findings.push(RedirectFinding::InsecureScheme(uri.to_string()));
                }
            }
            Err(_) => findings.push(RedirectFinding::Unparseable(uri.to_string())),
        }

        if !self.registered.is_empty() && !self.is_registered(uri) {
            findings.push(RedirectFinding::NotRegistered(uri.to_string()));
        }
        findings
    }
}

fn is_loopback_http(url: &Url) -> bool {
    if url.scheme() != "http" {
        return false;
    }
    match url.host() {
        Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
