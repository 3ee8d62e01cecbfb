//! Token authentication against the gateway's web-login endpoint
//!
//! The device hands out bearer tokens via a form-encoded password grant.
//! One manager exists per device session; it caches the token until shortly
//! before expiry and serializes refreshes so concurrent callers never issue
//! duplicate HTTP requests.

use crate::client::SessionConfig;
use crate::error::{EmsError, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Path of the token endpoint on the device.
pub(crate) const TOKEN_PATH: &str = "/api/web-login/token";

/// Fixed OAuth client identity of the device's own web UI.
const CLIENT_ID: &str = "emos";
const CLIENT_SECRET: &str = "56951025";

/// Tokens are never reused past `expiry - SAFETY_MARGIN`.
const SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Lifetime assumed when the device omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

/// Fixed timeout for the token request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at.checked_sub(SAFETY_MARGIN) {
            Some(deadline) => Instant::now() < deadline,
            None => false,
        }
    }
}

/// Bearer-token cache and refresher for one gateway device.
pub struct TokenManager {
    client: reqwest::Client,
    token_url: Url,
    origin: String,
    username: String,
    password: String,
    // Held across the HTTP request: concurrent callers await the single
    // in-flight refresh instead of issuing their own.
    cache: Mutex<Option<CachedToken>>,
}

impl TokenManager {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmsError::connect(format!("failed to build HTTP client: {e}")))?;

        let origin = format!("http://{}", config.host);
        let token_url = Url::parse(&format!("{origin}{TOKEN_PATH}"))
            .map_err(|e| EmsError::connect(format!("invalid host {:?}: {e}", config.host)))?;

        Ok(Self {
            client,
            token_url,
            origin,
            username: config.username.clone(),
            password: config.password.clone(),
            cache: Mutex::new(None),
        })
    }

    /// Return a token valid for at least the safety margin, fetching a new
    /// one from the device when the cached token is missing or stale.
    pub async fn get_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;

        // Re-check under the lock: another caller may have refreshed while
        // we waited.
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.token.clone());
            }
        }

        debug!(url = %self.token_url, "requesting bearer token");
        let fetched = self.fetch_token().await?;
        let token = fetched.token.clone();
        *cache = Some(fetched);
        info!("obtained bearer token from gateway");
        Ok(token)
    }

    /// Drop the cached token so the next caller performs a full login.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let form = [
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];

        // The device's web server expects the same decorations its own login
        // page sends.
        let response = self
            .client
            .post(self.token_url.clone())
            .header("Origin", &self.origin)
            .header("Referer", format!("{}/login", self.origin))
            .header("User-Agent", "Mozilla/5.0")
            .header("X-Requested-With", "XMLHttpRequest")
            .form(&form)
            .send()
            .await
            .map_err(|e| EmsError::connect(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(EmsError::auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| EmsError::connect(format!("failed to read token response: {e}")))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| EmsError::protocol(format!("unexpected token response body: {e}")))?;
        let token = parsed
            .access_token
            .ok_or_else(|| EmsError::protocol("token response missing access_token"))?;

        let lifetime = parsed
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);

        // An absurd expires_in would overflow Instant arithmetic; cap it at
        // the default rather than trusting the device.
        let now = Instant::now();
        let expires_at = now
            .checked_add(lifetime)
            .unwrap_or(now + DEFAULT_LIFETIME);

        Ok(CachedToken { token, expires_at })
    }
}
