//! Credentials used to authorize outbound calls and to sign custom tokens.
//!
//! A [`Credential`] is created once when the SDK is initialized and never
//! changes afterwards. Bearer tokens minted from it are cached by a
//! [`CachedTokenSource`] until shortly before they expire.

mod metadata;
mod service_account;
mod signer;
mod token;

use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Error, ErrorKind, Result};

pub use metadata::MetadataTokenSource;
pub use service_account::ServiceAccountKey;
pub(crate) use signer::*;
pub use token::*;

/// Environment variable pointing at a service account or authorized user JSON file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

pub(crate) const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 scopes requested for SDK bearer tokens.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/datastore",
    "https://www.googleapis.com/auth/devstorage.full_control",
    "https://www.googleapis.com/auth/firebase",
    "https://www.googleapis.com/auth/firebase.messaging",
    "https://www.googleapis.com/auth/identitytoolkit",
    "https://www.googleapis.com/auth/userinfo.email",
];

/// Something that can mint OAuth2 bearer tokens.
///
/// Implement this to plug an externally managed token into the SDK. Built-in
/// implementations cover service accounts, refresh tokens and the compute
/// metadata server.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Returns a bearer token, fetching a new one if necessary.
    async fn token(&self) -> Result<AccessToken>;
}

/// Client id, secret and refresh token of an authorized user.
#[derive(Clone, Deserialize)]
pub struct AuthorizedUser {
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Token endpoint. Defaults to Google's OAuth2 endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_owned()
}

impl fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// The principal the SDK acts as.
///
/// Exactly one variant is active for the lifetime of an [`App`](crate::App).
#[derive(Clone)]
pub enum Credential {
    /// A service account with a private key. Custom tokens are signed locally.
    ServiceAccount(ServiceAccountKey),
    /// An authorized user holding a refresh token.
    RefreshToken(AuthorizedUser),
    /// A caller supplied token source. Custom tokens are signed through IAM.
    Implicit(Arc<dyn TokenSource>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(key) => f.debug_tuple("ServiceAccount").field(key).finish(),
            Self::RefreshToken(user) => f.debug_tuple("RefreshToken").field(user).finish(),
            Self::Implicit(_) => f.write_str("Implicit"),
        }
    }
}

#[derive(Deserialize)]
struct CredentialFileType {
    #[serde(rename = "type")]
    kind: String,
}

impl Credential {
    /// Parses a service account or authorized user JSON document.
    pub fn from_json(json: &[u8]) -> Result<Credential> {
        let file_type: CredentialFileType = serde_json::from_slice(json).map_err(|err| {
            Error::invalid_argument(format!("invalid credentials JSON: {err}")).with_source(err)
        })?;

        match file_type.kind.as_str() {
            "service_account" => {
                let key: ServiceAccountKey = serde_json::from_slice(json)?;
                key.validate()?;
                Ok(Credential::ServiceAccount(key))
            }
            "authorized_user" => {
                let user: AuthorizedUser = serde_json::from_slice(json)?;
                Ok(Credential::RefreshToken(user))
            }
            other => Err(Error::invalid_argument(format!(
                "unsupported credentials type: {other:?}"
            ))),
        }
    }

    /// Reads a credentials JSON file from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Credential> {
        let path = path.as_ref();
        let json = fs::read(path).map_err(|err| {
            Error::invalid_argument(format!(
                "failed to read credentials file {}: {err}",
                path.display()
            ))
            .with_source(err)
        })?;
        Self::from_json(&json)
    }

    /// Resolves application default credentials.
    ///
    /// Uses `GOOGLE_APPLICATION_CREDENTIALS` when set, otherwise the compute
    /// metadata server.
    pub fn from_env() -> Result<Credential> {
        match env::var(CREDENTIALS_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Ok(Self::implicit(MetadataTokenSource::new())),
        }
    }

    /// Wraps a custom token source.
    pub fn implicit(source: impl TokenSource + 'static) -> Credential {
        Credential::Implicit(Arc::new(source))
    }

    /// The project id embedded in a service account key, if any.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ServiceAccount(key) => key.project_id.as_deref().filter(|id| !id.is_empty()),
            _ => None,
        }
    }

    /// Builds a caching token source for this credential.
    pub(crate) fn token_source(&self, http: reqwest::Client) -> Arc<dyn TokenSource> {
        let inner: Arc<dyn TokenSource> = match self {
            Self::ServiceAccount(key) => Arc::new(service_account::JwtBearerSource::new(
                key.clone(),
                http,
            )),
            Self::RefreshToken(user) => Arc::new(RefreshTokenSource::new(user.clone(), http)),
            Self::Implicit(source) => Arc::clone(source),
        };
        Arc::new(CachedTokenSource::new(inner))
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}

/// Exchanges a refresh token for bearer tokens.
struct RefreshTokenSource {
    user: AuthorizedUser,
    http: reqwest::Client,
}

impl RefreshTokenSource {
    fn new(user: AuthorizedUser, http: reqwest::Client) -> Self {
        Self { user, http }
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        let response = self
            .http
            .post(&self.user.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.user.client_id.as_str()),
                ("client_secret", self.user.client_secret.as_str()),
                ("refresh_token", self.user.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(token_fetch_error)?;

        read_token_response(response).await
    }
}

pub(crate) async fn read_token_response(response: reqwest::Response) -> Result<AccessToken> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::new(
            ErrorKind::Unauthenticated,
            format!("failed to obtain access token ({status}): {body}"),
        ));
    }

    let token: TokenResponse = response.json().await.map_err(token_fetch_error)?;
    Ok(AccessToken::new(token.access_token, token.expires_in))
}

pub(crate) fn token_fetch_error(err: reqwest::Error) -> Error {
    Error::new(
        ErrorKind::Unauthenticated,
        format!("failed to obtain access token: {err}"),
    )
    .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[test]
    fn parses_authorized_user_json() {
        let json = json!({
            "type": "authorized_user",
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh",
        });
        let credential = Credential::from_json(json.to_string().as_bytes()).unwrap();
        match credential {
            Credential::RefreshToken(user) => {
                assert_eq!(user.client_id, "client");
                assert_eq!(user.token_uri, GOOGLE_TOKEN_URI);
            }
            other => panic!("unexpected credential {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_credential_type() {
        let err = Credential::from_json(br#"{"type": "external_account"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let user = AuthorizedUser {
            client_id: "client".into(),
            client_secret: "very-secret".into(),
            refresh_token: "refresh-secret".into(),
            token_uri: GOOGLE_TOKEN_URI.into(),
        };
        let debug = format!("{:?}", Credential::RefreshToken(user));
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("refresh-secret"));
    }

    #[actix_rt::test]
    async fn refresh_token_source_exchanges_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .body_contains("grant_type=refresh_token")
                    .body_contains("refresh_token=refresh");
                then.status(200)
                    .json_body(json!({"access_token": "ya29.token", "expires_in": 3600}));
            })
            .await;

        let source = RefreshTokenSource::new(
            AuthorizedUser {
                client_id: "client".into(),
                client_secret: "secret".into(),
                refresh_token: "refresh".into(),
                token_uri: server.url("/token"),
            },
            reqwest::Client::new(),
        );

        let token = source.token().await.unwrap();
        assert_eq!(token.token(), "ya29.token");
        assert!(token.expiry().is_some());
        mock.assert_async().await;
    }

    #[actix_rt::test]
    async fn refresh_failure_is_unauthenticated() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400).body(r#"{"error": "invalid_grant"}"#);
            })
            .await;

        let source = RefreshTokenSource::new(
            AuthorizedUser {
                client_id: "client".into(),
                client_secret: "secret".into(),
                refresh_token: "revoked".into(),
                token_uri: server.url("/token"),
            },
            reqwest::Client::new(),
        );

        let err = source.token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }
}
