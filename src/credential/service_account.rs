use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::{read_token_response, token_fetch_error, AccessToken, TokenSource, SCOPES};
use crate::{Error, ErrorKind, Result};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// A Google service account key as downloaded from the Cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Project the service account belongs to.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Id of the private key.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// PEM encoded RSA private key.
    pub private_key: String,
    /// Service account email address.
    pub client_email: String,
    /// OAuth2 client id of the service account.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Token endpoint used for the JWT bearer grant.
    #[serde(default = "super::default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("private_key_id", &self.private_key_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.client_email.is_empty() {
            return Err(Error::invalid_argument(
                "service account key is missing client_email",
            ));
        }
        self.encoding_key().map(|_| ())
    }

    pub(crate) fn encoding_key(&self) -> Result<EncodingKey> {
        EncodingKey::from_rsa_pem(self.private_key.as_bytes()).map_err(|err| {
            Error::invalid_argument(format!("invalid service account private key: {err}"))
                .with_source(err)
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// Mints bearer tokens with the OAuth2 JWT bearer grant.
pub(super) struct JwtBearerSource {
    key: ServiceAccountKey,
    http: reqwest::Client,
}

impl JwtBearerSource {
    pub(super) fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self { key, http }
    }

    fn assertion(&self) -> Result<String> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPES.join(" "),
            aud: &self.key.token_uri,
            iat,
            exp: iat + 3600,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);

        jsonwebtoken::encode(&header, &claims, &self.key.encoding_key()?).map_err(|err| {
            Error::new(
                ErrorKind::Unauthenticated,
                format!("failed to sign token assertion: {err}"),
            )
            .with_source(err)
        })
    }
}

#[async_trait]
impl TokenSource for JwtBearerSource {
    async fn token(&self) -> Result<AccessToken> {
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(token_fetch_error)?;

        read_token_response(response).await
    }
}
