use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::transport::{has_status_ok, HttpClient, Request, Response};
use crate::{Error, ErrorKind};

/// X.509 certificates of the ID token signing keys.
pub(crate) const ID_TOKEN_KEYS_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

/// X.509 certificates of the session cookie signing keys.
pub(crate) const SESSION_COOKIE_KEYS_URL: &str =
    "https://www.googleapis.com/identitytoolkit/v3/relyingparty/publicKeys";

/// Fallback lifetime if no `max-age` is provided in the Cache-Control header.
const FALLBACK_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// A fresh key set is refetched on an unknown `kid` only if it is at least this old.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Errors that can occur while fetching or parsing public keys.
#[derive(Debug, thiserror::Error)]
pub enum PublicKeysError {
    /// The key endpoint could not be reached or answered with an error.
    #[error("failed to fetch public keys from the identity provider: {0}")]
    FetchPublicKeys(#[source] Box<Error>),

    /// The `max-age` directive has no value.
    #[error("the 'max-age' directive is present but empty")]
    EmptyMaxAgeDirective,

    /// The `max-age` directive is not a number.
    #[error("the 'max-age' directive is not a valid number")]
    InvalidMaxAgeValue,

    /// The Cache-Control header has no `max-age` directive.
    #[error("no 'max-age' directive found in 'Cache-Control' header")]
    MissingMaxAgeDirective,

    /// The response body is not a map of key ids to PEM certificates.
    #[error("failed to parse one or more public keys: {0}")]
    PublicKeyParseError(#[source] serde_json::Error),
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
    max_age: Duration,
    generation: u64,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.max_age
    }
}

enum Lookup {
    Hit(DecodingKey),
    /// The key set is fresh but lacks the key.
    Unknown { generation: u64, recent: bool },
    Stale,
}

/// Caches public signing keys by key id.
///
/// The cache honours the `max-age` of the key response. Refreshes are
/// single-flight: concurrent misses wait for one fetch and then read its
/// result. A fresh key set that does not contain the requested key id is
/// refetched once, to pick up rotated keys early.
pub(crate) struct KeyCache {
    url: String,
    http: HttpClient,
    state: RwLock<Option<CachedKeys>>,
    refresh: Mutex<()>,
}

impl KeyCache {
    pub(crate) fn new(url: impl Into<String>, http: HttpClient) -> Self {
        Self {
            url: url.into(),
            http,
            state: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn lookup(&self, kid: &str) -> Lookup {
        match self.state.read().await.as_ref() {
            Some(cached) if cached.is_fresh() => match cached.keys.get(kid) {
                Some(key) => Lookup::Hit(key.clone()),
                None => Lookup::Unknown {
                    generation: cached.generation,
                    recent: cached.fetched_at.elapsed() < MIN_REFRESH_INTERVAL,
                },
            },
            _ => Lookup::Stale,
        }
    }

    /// Returns the key for `kid`, or `None` if the key set has no such key.
    pub(crate) async fn get(&self, kid: &str) -> Result<Option<DecodingKey>, PublicKeysError> {
        let seen = match self.lookup(kid).await {
            Lookup::Hit(key) => return Ok(Some(key)),
            Lookup::Unknown { recent: true, .. } => return Ok(None),
            Lookup::Unknown { generation, .. } => Some(generation),
            Lookup::Stale => None,
        };

        let _gate = self.refresh.lock().await;

        match self.lookup(kid).await {
            Lookup::Hit(key) => return Ok(Some(key)),
            Lookup::Unknown { recent: true, .. } => return Ok(None),
            // Refreshed by someone else while we waited; the key is still missing.
            Lookup::Unknown { generation, .. } if Some(generation) != seen => return Ok(None),
            Lookup::Unknown { .. } | Lookup::Stale => {}
        }

        self.refresh_keys().await?;

        Ok(match self.lookup(kid).await {
            Lookup::Hit(key) => Some(key),
            Lookup::Unknown { .. } | Lookup::Stale => None,
        })
    }

    async fn refresh_keys(&self) -> Result<(), PublicKeysError> {
        let response = self
            .http
            .send(&Request::get(&self.url).success_fn(has_status_ok))
            .await
            .map_err(|err| PublicKeysError::FetchPublicKeys(Box::new(err)))?;

        let (keys, max_age) = parse_key_response(&response)?;
        debug!(url = %self.url, count = keys.len(), ?max_age, "Updated public keys");

        let mut state = self.state.write().await;
        let generation = state.as_ref().map_or(0, |cached| cached.generation + 1);
        *state = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
            max_age,
            generation,
        });
        Ok(())
    }
}

fn parse_key_response(
    response: &Response,
) -> Result<(HashMap<String, DecodingKey>, Duration), PublicKeysError> {
    let max_age = response
        .headers
        .get("Cache-Control")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| match parse_max_age_value(value) {
            Ok(max_age) => Some(max_age),
            Err(err) => {
                debug!("Using fallback key lifetime: {err}");
                None
            }
        })
        .unwrap_or(FALLBACK_MAX_AGE);

    // `{"<kid>": "-----BEGIN CERTIFICATE-----..."}`
    let certificates: HashMap<String, String> =
        serde_json::from_slice(&response.body).map_err(PublicKeysError::PublicKeyParseError)?;

    let mut keys = HashMap::with_capacity(certificates.len());
    for (kid, pem) in certificates {
        match DecodingKey::from_rsa_pem(pem.as_bytes()) {
            Ok(decoding) => {
                keys.insert(kid, decoding);
            }
            Err(err) => warn!(%kid, "Skipping malformed public key certificate: {err}"),
        }
    }

    Ok((keys, max_age))
}

/// Parses the `max-age` directive from a Cache-Control header string.
pub(crate) fn parse_max_age_value(value: &str) -> Result<Duration, PublicKeysError> {
    for directive in value.split(',') {
        let mut parts = directive.trim().splitn(2, '=');
        let key = parts.next().unwrap_or("").trim();
        let val = parts.next().unwrap_or("").trim();

        if key.eq_ignore_ascii_case("max-age") {
            if val.is_empty() {
                return Err(PublicKeysError::EmptyMaxAgeDirective);
            }
            let secs = val
                .parse::<u64>()
                .map_err(|_| PublicKeysError::InvalidMaxAgeValue)?;
            return Ok(Duration::from_secs(secs));
        }
    }

    Err(PublicKeysError::MissingMaxAgeDirective)
}

/// Converts a key fetch failure into a crate error, surfacing cancellation as is.
pub(crate) fn key_fetch_error(err: PublicKeysError) -> Error {
    match err {
        PublicKeysError::FetchPublicKeys(inner) if inner.kind() == ErrorKind::Cancelled => *inner,
        other => other.into(),
    }
}
