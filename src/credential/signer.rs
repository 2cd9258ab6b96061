use async_trait::async_trait;
use base64::prelude::{BASE64_STANDARD, BASE64_URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{MetadataTokenSource, ServiceAccountKey};
use crate::transport::{HttpClient, Request};
use crate::{Error, ErrorKind, Result};

const IAM_SIGN_BLOB_URL: &str =
    "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts";

/// Email used as issuer of custom tokens minted against the auth emulator.
pub(crate) const EMULATOR_SERVICE_ACCOUNT: &str = "firebase-auth-emulator@example.com";

/// Produces signatures for custom tokens.
#[async_trait]
pub(crate) trait Signer: Send + Sync {
    /// Service account email the signature can be attributed to.
    async fn email(&self) -> Result<String>;

    /// Signs `payload`, returning the raw signature bytes.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Value of the JWT `alg` header for tokens signed by this signer.
    fn algorithm(&self) -> &'static str {
        "RS256"
    }
}

/// Signs locally with a service account private key.
pub(crate) struct LocalSigner {
    email: String,
    key: EncodingKey,
}

impl LocalSigner {
    pub(crate) fn new(key: &ServiceAccountKey) -> Result<Self> {
        Ok(Self {
            email: key.client_email.clone(),
            key: key.encoding_key()?,
        })
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn email(&self) -> Result<String> {
        Ok(self.email.clone())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let signature =
            jsonwebtoken::crypto::sign(payload, &self.key, Algorithm::RS256).map_err(|err| {
                Error::new(
                    ErrorKind::Unknown,
                    format!("failed to sign custom token: {err}"),
                )
                .with_source(err)
            })?;

        BASE64_URL_SAFE_NO_PAD.decode(signature).map_err(|err| {
            Error::new(ErrorKind::Unknown, format!("malformed signature: {err}")).with_source(err)
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignBlobResponse {
    signed_blob: String,
}

/// Signs remotely through the IAM credentials `signBlob` endpoint.
///
/// The service account email is either configured explicitly or discovered
/// from the compute metadata server on first use.
pub(crate) struct IamSigner {
    http: HttpClient,
    base_url: String,
    email: OnceCell<String>,
    metadata: MetadataTokenSource,
}

impl IamSigner {
    pub(crate) fn new(http: HttpClient, service_account_id: Option<String>) -> Self {
        Self {
            http,
            base_url: IAM_SIGN_BLOB_URL.to_owned(),
            email: service_account_id
                .filter(|id| !id.is_empty())
                .map_or_else(OnceCell::new, |id| OnceCell::new_with(Some(id))),
            metadata: MetadataTokenSource::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints(mut self, base_url: String, metadata: MetadataTokenSource) -> Self {
        self.base_url = base_url;
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl Signer for IamSigner {
    async fn email(&self) -> Result<String> {
        let email = self
            .email
            .get_or_try_init(|| async {
                debug!("Discovering service account email from the metadata server");
                self.metadata.service_account_email().await.map_err(|err| {
                    err.context(
                        "failed to determine service account; initialize the SDK with a \
                         service account credential or set serviceAccountId",
                    )
                })
            })
            .await?;
        Ok(email.clone())
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let email = self.email().await?;
        let url = format!("{}/{email}:signBlob", self.base_url);
        let req = Request::post(url).json(json!({ "payload": BASE64_STANDARD.encode(payload) }))?;

        let response: SignBlobResponse = self.http.send_json(&req).await?;
        BASE64_STANDARD.decode(response.signed_blob).map_err(|err| {
            Error::new(
                ErrorKind::Unknown,
                format!("signBlob returned a malformed signature: {err}"),
            )
            .with_source(err)
        })
    }
}

/// Produces unsigned tokens accepted only by the auth emulator.
pub(crate) struct EmulatorSigner;

#[async_trait]
impl Signer for EmulatorSigner {
    async fn email(&self) -> Result<String> {
        Ok(EMULATOR_SERVICE_ACCOUNT.to_owned())
    }

    async fn sign(&self, _payload: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn algorithm(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::StaticTokenSource;
    use crate::test_support::test_service_account;
    use crate::transport::RetryConfig;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use jsonwebtoken::DecodingKey;
    use std::sync::Arc;

    #[actix_rt::test]
    async fn local_signer_produces_verifiable_rs256_signature() {
        let (key, public_pem) = test_service_account("https://oauth2.googleapis.com/token");
        let signer = LocalSigner::new(&key).unwrap();

        let signature = signer.sign(b"header.payload").await.unwrap();
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(signature);
        let valid = jsonwebtoken::crypto::verify(
            &encoded,
            b"header.payload",
            &DecodingKey::from_rsa_pem(&public_pem).unwrap(),
            Algorithm::RS256,
        )
        .unwrap();
        assert!(valid);
        assert_eq!(signer.email().await.unwrap(), key.client_email);
    }

    fn http() -> HttpClient {
        HttpClient::new(
            reqwest::Client::new(),
            Some(Arc::new(StaticTokenSource::new("iam-token"))),
        )
        .with_retry(RetryConfig::none())
    }

    #[actix_rt::test]
    async fn iam_signer_calls_sign_blob() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/iam/sa@example.com:signBlob")
                    .header("Authorization", "Bearer iam-token")
                    .json_body(serde_json::json!({"payload": BASE64_STANDARD.encode("to-sign")}));
                then.status(200).json_body(serde_json::json!({
                    "keyId": "key",
                    "signedBlob": BASE64_STANDARD.encode("signature"),
                }));
            })
            .await;

        let signer = IamSigner::new(http(), Some("sa@example.com".into())).with_endpoints(
            server.url("/iam"),
            MetadataTokenSource::with_base_url(server.url("/metadata")),
        );
        let signature = signer.sign(b"to-sign").await.unwrap();
        assert_eq!(signature, b"signature");
        mock.assert_async().await;
    }

    #[actix_rt::test]
    async fn iam_signer_discovers_email_once() {
        let server = MockServer::start_async().await;
        let email_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/metadata/email");
                then.status(200).body("discovered@example.com");
            })
            .await;

        let signer = IamSigner::new(http(), None).with_endpoints(
            server.url("/iam"),
            MetadataTokenSource::with_base_url(server.url("/metadata")),
        );
        assert_eq!(signer.email().await.unwrap(), "discovered@example.com");
        assert_eq!(signer.email().await.unwrap(), "discovered@example.com");
        assert_eq!(email_mock.hits_async().await, 1);
    }

    #[actix_rt::test]
    async fn iam_signer_without_metadata_server_is_unauthenticated() {
        let signer = IamSigner::new(http(), None).with_endpoints(
            "http://127.0.0.1:9/iam".into(),
            MetadataTokenSource::with_base_url("http://127.0.0.1:9"),
        );
        let err = signer.sign(b"payload").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }
}
