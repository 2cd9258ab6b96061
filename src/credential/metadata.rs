use std::env;
use std::time::Duration;

use async_trait::async_trait;

use super::{read_token_response, AccessToken, TokenSource};
use crate::{Error, ErrorKind, Result};

const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const SERVICE_ACCOUNT_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default";

/// Metadata requests fail fast so that code running outside Google Cloud does
/// not hang waiting for a server that does not exist.
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

fn metadata_base_url() -> String {
    let host = env::var(METADATA_HOST_ENV)
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_owned());
    format!("http://{host}{SERVICE_ACCOUNT_PATH}")
}

/// Fetches tokens for the default service account from the compute metadata server.
#[derive(Clone)]
pub struct MetadataTokenSource {
    base_url: String,
    http: reqwest::Client,
}

impl Default for MetadataTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTokenSource {
    /// Creates a source talking to the metadata server of the current host.
    pub fn new() -> Self {
        Self::with_base_url(metadata_base_url())
    }

    pub(crate) fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .header("Metadata-Flavor", "Google")
            .timeout(METADATA_TIMEOUT)
    }

    /// Looks up the email of the default service account.
    pub(crate) async fn service_account_email(&self) -> Result<String> {
        let response = self.get("/email").send().await.map_err(unreachable_error)?;
        if !response.status().is_success() {
            return Err(Error::new(
                ErrorKind::Unauthenticated,
                format!(
                    "metadata server returned {} while looking up the service account email",
                    response.status()
                ),
            ));
        }

        let email = response.text().await.map_err(unreachable_error)?;
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::new(
                ErrorKind::Unauthenticated,
                "metadata server returned an empty service account email",
            ));
        }
        Ok(email.to_owned())
    }
}

fn unreachable_error(err: reqwest::Error) -> Error {
    Error::new(
        ErrorKind::Unauthenticated,
        format!("failed to reach the compute metadata server: {err}"),
    )
    .with_source(err)
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        let response = self.get("/token").send().await.map_err(unreachable_error)?;
        read_token_response(response).await
    }
}
