use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::TokenSource;
use crate::Result;

/// Tokens are refreshed this long before they actually expire.
pub(crate) const EXPIRY_SKEW: Duration = Duration::from_secs(5 * 60);

/// An OAuth2 bearer token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    token: String,
    expiry: Option<SystemTime>,
}

impl AccessToken {
    /// Creates a token that expires `expires_in` seconds from now, or never
    /// when `expires_in` is `None`.
    pub fn new(token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            token: token.into(),
            expiry: expires_in.map(|secs| SystemTime::now() + Duration::from_secs(secs)),
        }
    }

    /// Creates a token with an absolute expiry.
    pub fn with_expiry(token: impl Into<String>, expiry: SystemTime) -> Self {
        Self {
            token: token.into(),
            expiry: Some(expiry),
        }
    }

    /// The bearer token value.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// When the token expires, if known.
    pub fn expiry(&self) -> Option<SystemTime> {
        self.expiry
    }

    /// Whether the token can still be used, leaving [`EXPIRY_SKEW`] of headroom.
    pub(crate) fn is_fresh(&self) -> bool {
        match self.expiry {
            Some(expiry) => SystemTime::now() + EXPIRY_SKEW < expiry,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

/// A token source that always returns the same token.
///
/// Useful for the auth emulator and for tokens managed outside the SDK.
#[derive(Clone)]
pub struct StaticTokenSource(String);

impl StaticTokenSource {
    /// Creates a source returning `token` forever.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        Ok(AccessToken::new(self.0.clone(), None))
    }
}

/// Caches tokens from an inner source and refreshes them single-flight.
///
/// At most one refresh runs at a time. Callers that arrive while a refresh is
/// in progress wait on the refresh gate and then read the freshly stored token.
pub struct CachedTokenSource {
    inner: Arc<dyn TokenSource>,
    current: RwLock<Option<AccessToken>>,
    refresh: Mutex<()>,
}

impl CachedTokenSource {
    /// Wraps `inner` with a token cache.
    pub fn new(inner: Arc<dyn TokenSource>) -> Self {
        Self {
            inner,
            current: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn cached(&self) -> Option<AccessToken> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|token| token.is_fresh())
            .cloned()
    }
}

#[async_trait]
impl TokenSource for CachedTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        let _gate = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the gate.
        if let Some(token) = self.cached().await {
            return Ok(token);
        }

        debug!("Refreshing OAuth2 access token");
        let token = self.inner.token().await?;
        *self.current.write().await = Some(token.clone());
        Ok(token)
    }
}
