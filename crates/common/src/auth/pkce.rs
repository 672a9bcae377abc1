//! PKCE (Proof Key for Code Exchange) implementation for OAuth 2.0
//!
//! Implements RFC 7636 verifier/challenge generation plus the random `state`
//! value used for CSRF protection on the authorization redirect.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Shortest verifier RFC 7636 allows.
pub const MIN_VERIFIER_LEN: usize = 43;

/// Longest verifier RFC 7636 allows.
pub const MAX_VERIFIER_LEN: usize = 128;

/// Random bytes drawn for a default verifier (86 characters once encoded).
pub const DEFAULT_VERIFIER_BYTES: usize = 64;

/// Random bytes behind a `state` value (256 bits).
pub const STATE_BYTES: usize = 32;

/// `code_challenge_method` values understood by authorization servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChallengeMethod {
    /// `BASE64URL(SHA256(ASCII(verifier)))`
    #[default]
    #[serde(rename = "S256")]
    S256,
    /// The verifier itself.
    #[serde(rename = "plain")]
    Plain,
}

impl ChallengeMethod {
    /// Wire name sent as `code_challenge_method`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            m if m.eq_ignore_ascii_case("s256") => Ok(Self::S256),
            m if m.eq_ignore_ascii_case("plain") => Ok(Self::Plain),
            other => Err(format!("unsupported PKCE challenge method: {other}")),
        }
    }
}

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a code verifier from `length` random bytes.
///
/// The encoded result is clamped into the RFC 7636 43-128 character window:
/// short draws are extended with more random characters, long ones truncated.
/// Every character is from the unreserved URL-safe alphabet.
#[must_use]
pub fn generate_code_verifier(length: usize) -> String {
    let mut verifier = random_urlsafe(length.max(1));
    while verifier.len() < MIN_VERIFIER_LEN {
        verifier.push_str(&random_urlsafe(STATE_BYTES));
    }
    verifier.truncate(MAX_VERIFIER_LEN);
    verifier
}

/// Derive the code challenge for `verifier`.
///
/// Per RFC 7636, `S256` is `BASE64URL(SHA256(ASCII(code_verifier)))` without
/// padding; `plain` returns the verifier unchanged.
#[must_use]
pub fn code_challenge(verifier: &str, method: ChallengeMethod) -> String {
    match method {
        ChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        ChallengeMethod::Plain => verifier.to_string(),
    }
}

/// Generate a random state token for CSRF protection
///
/// 32 random bytes, URL-safe base64 without padding (43 characters).
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(STATE_BYTES)
}

/// Compare an expected and a received `state` without short-circuiting on the
/// first differing byte.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    let (expected, actual) = (expected.as_bytes(), actual.as_bytes());
    if expected.len() != actual.len() {
        return false;
    }
    expected.iter().zip(actual).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// PKCE verifier/challenge pair for one authorization request.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Secret kept until the token exchange.
    pub verifier: String,
    /// Derived value sent on the authorization request.
    pub challenge: String,
    /// How `challenge` was derived.
    pub method: ChallengeMethod,
}

impl PkcePair {
    /// Generate a fresh pair with a default-length verifier.
    #[must_use]
    pub fn generate(method: ChallengeMethod) -> Self {
        let verifier = generate_code_verifier(DEFAULT_VERIFIER_BYTES);
        let challenge = code_challenge(&verifier, method);
        Self { verifier, challenge, method }
    }
}
