//! OAuth 2.0 client-credentials token cache.
//!
//! The cache holds at most one bearer token. It is refreshed lazily: a call to
//! [`TokenCache::get_token`] after the cached token expired performs a single
//! fetch against the token endpoint. There is no background renewal and no
//! retry on failure.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::Credentials;

/// Seconds subtracted from the declared token lifetime so a token is never
/// presented right at its expiry.
pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;
/// Lifetime assumed when the token endpoint omits `expires_in` or declares a
/// non-positive one (24 hours).
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 86_400;

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Errors produced while fetching a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// A bearer token together with the instant it stops being used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Whether the token may still be presented at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Remaining lifetime at `now`, never negative.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.expires_at - now).max(TimeDelta::zero())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Caches the bearer token obtained with the client-credentials grant.
///
/// The cached value sits behind a mutex that is only held for the swap, never
/// across an await. Two requests racing on an expired token may both fetch;
/// the last response to arrive wins.
pub struct TokenCache {
    http: reqwest::Client,
    credentials: Credentials,
    token_url: String,
    scope: String,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// Creates an empty cache that uses the system clock.
    pub fn new(
        http: reqwest::Client,
        credentials: Credentials,
        token_url: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            token_url: token_url.into(),
            scope: scope.into(),
            clock: Arc::new(SystemClock),
            cached: Mutex::new(None),
        }
    }

    /// Replaces the time source used for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Returns a valid token, fetching a new one if none is cached or the
    /// cached one expired.
    pub async fn get_token(&self) -> Result<CachedToken, TokenError> {
        if let Some(token) = self.cached().filter(|token| token.is_valid_at(self.now())) {
            log::debug!("Using cached access token");
            return Ok(token);
        }

        log::info!("Fetching new access token");
        self.fetch_token().await
    }

    /// Requests a fresh token from the authorization server and caches it.
    pub async fn fetch_token(&self) -> Result<CachedToken, TokenError> {
        log::debug!("Requesting token from {}", self.token_url);

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(self.credentials.client_secret.expose_secret()),
            )
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .inspect_err(|e| log::error!("Error fetching access token: {e}"))?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log::error!("Error fetching access token: status {status}, body {body}");
            return Err(TokenError::Status { status, body });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| TokenError::Malformed(e.to_string()))?;

        let access_token = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TokenError::Malformed("missing access_token".to_string()))?;

        // zero or negative lifetimes count as absent
        let expires_in = parsed
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = TimeDelta::try_seconds(expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS))
            .and_then(|lifetime| self.now().checked_add_signed(lifetime))
            .ok_or_else(|| TokenError::Malformed(format!("unusable expires_in {expires_in}")))?;

        let token = CachedToken {
            access_token,
            expires_at,
        };
        *self.lock() = Some(token.clone());

        log::info!("Token fetched successfully. Expires in {expires_in} seconds");
        Ok(token)
    }

    /// Snapshot of the cached token, valid or not, without fetching.
    pub fn cached(&self) -> Option<CachedToken> {
        self.lock().clone()
    }

    /// Drops the cached token; the next [`get_token`](Self::get_token) fetches.
    pub fn clear_token(&self) {
        self.lock().take();
        log::info!("Token cache cleared");
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedToken>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
