//! Firebase Authentication: custom tokens, ID token and session cookie
//! verification, and user management.

mod action_code;
#[cfg(feature = "idp")]
pub mod idp;
mod import;
mod keys;
mod token;
mod user;
mod user_mgt;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::credential::{
    Credential, EmulatorSigner, IamSigner, LocalSigner, Signer, StaticTokenSource,
};
use crate::transport::{platform_error, HttpClient, Request, Response};
use crate::{App, Error, ErrorKind, Result};

pub use action_code::ActionCodeSettings;
pub use import::{UserImportHash, UserImportResult, UserProvider, UserToImport};
pub use keys::PublicKeysError;
pub use token::{FirebaseInfo, Token};
pub use user::{
    DeleteUsersResult, ErrorInfo, ExportedUserRecord, GetUsersResult, ListUsersPage,
    MultiFactorInfo, UserIdentifier, UserInfo, UserMetadata, UserRecord, UserToCreate,
    UserToUpdate, DELETE_ATTRIBUTE,
};

use keys::KeyCache;
use token::{mint_custom_token, TokenKind, TokenVerifier};

/// Host of a running auth emulator, e.g. `localhost:9099`.
pub const EMULATOR_HOST_ENV: &str = "FIREBASE_AUTH_EMULATOR_HOST";

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

const SESSION_COOKIE_MIN_DURATION: Duration = Duration::from_secs(5 * 60);
const SESSION_COOKIE_MAX_DURATION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

struct AuthInner {
    project_id: String,
    base_url: String,
    signer: Box<dyn Signer>,
    id_tokens: TokenVerifier,
    session_cookies: TokenVerifier,
}

/// Client for the Firebase Authentication service.
///
/// Cloning is cheap and clones share key caches and the connection pool.
/// A client obtained through [`for_tenant`](Self::for_tenant) scopes every
/// operation to that tenant.
#[derive(Clone)]
pub struct AuthClient {
    inner: Arc<AuthInner>,
    http: HttpClient,
    tenant_id: Option<String>,
}

impl AuthClient {
    pub(crate) fn new(app: &App) -> Result<Self> {
        let project_id = app.project_id().map(str::to_owned).ok_or_else(|| {
            Error::invalid_argument(
                "project id is required to access the auth service; use a service account \
                 credential or set the project id in the config",
            )
        })?;

        let unauthenticated = HttpClient::new(app.reqwest().clone(), None);

        match env::var(EMULATOR_HOST_ENV) {
            Ok(host) if !host.is_empty() => {
                debug!(%host, "Using the auth emulator");
                let http = HttpClient::new(
                    app.reqwest().clone(),
                    Some(Arc::new(StaticTokenSource::new("owner"))),
                );
                Ok(Self::from_parts(AuthSettings {
                    project_id,
                    base_url: format!("http://{host}/identitytoolkit.googleapis.com/v1"),
                    http,
                    keys_http: unauthenticated,
                    signer: Box::new(EmulatorSigner),
                    id_token_keys_url: TokenKind::IdToken.keys_url().to_owned(),
                    session_cookie_keys_url: TokenKind::SessionCookie.keys_url().to_owned(),
                    emulator: true,
                }))
            }
            _ => {
                let http = app.http_client();
                let signer: Box<dyn Signer> = match app.credential() {
                    Credential::ServiceAccount(key) => Box::new(LocalSigner::new(key)?),
                    _ => Box::new(IamSigner::new(
                        http.clone(),
                        app.config().service_account_id.clone(),
                    )),
                };
                Ok(Self::from_parts(AuthSettings {
                    project_id,
                    base_url: IDENTITY_TOOLKIT_URL.to_owned(),
                    http,
                    keys_http: unauthenticated,
                    signer,
                    id_token_keys_url: TokenKind::IdToken.keys_url().to_owned(),
                    session_cookie_keys_url: TokenKind::SessionCookie.keys_url().to_owned(),
                    emulator: false,
                }))
            }
        }
    }

    fn from_parts(settings: AuthSettings) -> Self {
        let AuthSettings {
            project_id,
            base_url,
            http,
            keys_http,
            signer,
            id_token_keys_url,
            session_cookie_keys_url,
            emulator,
        } = settings;

        let id_tokens = TokenVerifier::new(
            TokenKind::IdToken,
            project_id.clone(),
            KeyCache::new(id_token_keys_url, keys_http.clone()),
            emulator,
        );
        let session_cookies = TokenVerifier::new(
            TokenKind::SessionCookie,
            project_id.clone(),
            KeyCache::new(session_cookie_keys_url, keys_http),
            emulator,
        );

        Self {
            inner: Arc::new(AuthInner {
                project_id,
                base_url,
                signer,
                id_tokens,
                session_cookies,
            }),
            http: http.with_error_parser(auth_error),
            tenant_id: None,
        }
    }

    /// The project this client manages.
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// The tenant this client is scoped to, if any.
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns a client scoped to `tenant_id`.
    pub fn for_tenant(&self, tenant_id: impl Into<String>) -> Result<AuthClient> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(Error::invalid_argument("tenant id must be a non-empty string"));
        }
        Ok(Self {
            tenant_id: Some(tenant_id),
            ..self.clone()
        })
    }

    /// Returns a client whose operations abort with
    /// [`ErrorKind::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> AuthClient {
        Self {
            http: self.http.clone().with_cancellation(token),
            ..self.clone()
        }
    }

    /// Returns a client with a different per-attempt timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> AuthClient {
        Self {
            http: self.http.clone().with_timeout(timeout),
            ..self.clone()
        }
    }

    /// URL of a project (or tenant) scoped resource.
    pub(crate) fn project_url(&self, suffix: &str) -> String {
        match &self.tenant_id {
            Some(tenant) => format!(
                "{}/projects/{}/tenants/{tenant}{suffix}",
                self.inner.base_url, self.inner.project_id
            ),
            None => format!(
                "{}/projects/{}{suffix}",
                self.inner.base_url, self.inner.project_id
            ),
        }
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Creates a custom token for `uid`.
    pub async fn custom_token(&self, uid: &str) -> Result<String> {
        self.custom_token_with_claims(uid, None).await
    }

    /// Creates a custom token for `uid` carrying developer `claims`.
    ///
    /// Tenant clients embed their tenant id in the token.
    pub async fn custom_token_with_claims(
        &self,
        uid: &str,
        claims: Option<&Map<String, Value>>,
    ) -> Result<String> {
        self.http
            .guard(mint_custom_token(
                self.inner.signer.as_ref(),
                uid,
                claims,
                self.tenant_id(),
            ))
            .await?
    }

    async fn verify(&self, verifier: &TokenVerifier, token: &str) -> Result<Token> {
        let verified = self.http.guard(verifier.verify(token)).await??;

        if let Some(tenant) = &self.tenant_id {
            if verified.tenant_id() != Some(tenant.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "token has tenant id {:?} but expected {tenant:?}",
                    verified.tenant_id().unwrap_or_default()
                )));
            }
        }
        Ok(verified)
    }

    async fn check_revoked(&self, token: Token, kind: TokenKind) -> Result<Token> {
        let user = self.get_user(&token.uid).await?;
        if token.iat.saturating_mul(1000) < user.tokens_valid_after_millis {
            return Err(Error::new(
                kind.revoked_kind(),
                format!("the Firebase {} has been revoked", kind.name()),
            ));
        }
        Ok(token)
    }

    /// Verifies a Firebase ID token and returns its decoded claims.
    ///
    /// Does not check for revocation; see
    /// [`verify_id_token_and_check_revoked`](Self::verify_id_token_and_check_revoked).
    pub async fn verify_id_token(&self, id_token: &str) -> Result<Token> {
        self.verify(&self.inner.id_tokens, id_token).await
    }

    /// Verifies a Firebase ID token and checks that the user's refresh tokens
    /// were not revoked after it was issued.
    pub async fn verify_id_token_and_check_revoked(&self, id_token: &str) -> Result<Token> {
        let token = self.verify_id_token(id_token).await?;
        self.check_revoked(token, self.inner.id_tokens.kind()).await
    }

    /// Verifies a session cookie and returns its decoded claims.
    pub async fn verify_session_cookie(&self, cookie: &str) -> Result<Token> {
        self.verify(&self.inner.session_cookies, cookie).await
    }

    /// Verifies a session cookie and checks it was not revoked.
    pub async fn verify_session_cookie_and_check_revoked(&self, cookie: &str) -> Result<Token> {
        let token = self.verify_session_cookie(cookie).await?;
        self.check_revoked(token, self.inner.session_cookies.kind())
            .await
    }

    /// Exchanges an ID token for a session cookie valid for `expires_in`,
    /// which must be between five minutes and two weeks.
    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> Result<String> {
        if id_token.is_empty() {
            return Err(Error::invalid_argument("id token must not be empty"));
        }
        if !(SESSION_COOKIE_MIN_DURATION..=SESSION_COOKIE_MAX_DURATION).contains(&expires_in) {
            return Err(Error::invalid_argument(
                "session cookie duration must be between 5 minutes and 14 days",
            ));
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SessionCookieResponse {
            session_cookie: String,
        }

        let req = Request::post(self.project_url(":createSessionCookie")).json(json!({
            "idToken": id_token,
            "validDuration": expires_in.as_secs(),
        }))?;
        let resp: SessionCookieResponse = self.http.send_json(&req).await?;
        Ok(resp.session_cookie)
    }

    /// Revokes every refresh token of the user; ID tokens issued before now
    /// fail revocation checks.
    pub async fn revoke_refresh_tokens(&self, uid: &str) -> Result<()> {
        let update = UserToUpdate::new().valid_since(token::now_secs());
        self.update_user_request(uid, &update).await
    }
}

/// Everything needed to assemble an [`AuthClient`].
struct AuthSettings {
    project_id: String,
    base_url: String,
    http: HttpClient,
    keys_http: HttpClient,
    signer: Box<dyn Signer>,
    id_token_keys_url: String,
    session_cookie_keys_url: String,
    emulator: bool,
}

#[derive(Deserialize)]
struct AuthErrorEnvelope {
    error: AuthErrorBody,
}

#[derive(Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    message: String,
}

/// Identity Toolkit codes with a dedicated kind.
fn auth_error_kind(code: &str) -> Option<(ErrorKind, &'static str)> {
    let mapped = match code {
        "CONFIGURATION_NOT_FOUND" => (
            ErrorKind::ConfigurationNotFound,
            "no identity provider configuration found for the given identifier",
        ),
        "DUPLICATE_EMAIL" | "EMAIL_EXISTS" => (
            ErrorKind::EmailAlreadyExists,
            "user with the provided email already exists",
        ),
        "DUPLICATE_LOCAL_ID" => (
            ErrorKind::UidAlreadyExists,
            "user with the provided uid already exists",
        ),
        "PHONE_NUMBER_EXISTS" => (
            ErrorKind::PhoneNumberAlreadyExists,
            "user with the provided phone number already exists",
        ),
        "INVALID_EMAIL" => (ErrorKind::InvalidEmail, "invalid email address"),
        "INVALID_PHONE_NUMBER" => (ErrorKind::InvalidPhoneNumber, "invalid phone number"),
        "WEAK_PASSWORD" | "INVALID_PASSWORD" => (ErrorKind::InvalidPassword, "invalid password"),
        "TENANT_NOT_FOUND" => (
            ErrorKind::TenantNotFound,
            "no tenant found for the given identifier",
        ),
        "USER_NOT_FOUND" => (
            ErrorKind::UserNotFound,
            "no user record found for the given identifier",
        ),
        "INSUFFICIENT_PERMISSION" => (
            ErrorKind::InsufficientPermission,
            "credential lacks the permission required for this operation",
        ),
        "INVALID_ID_TOKEN" => (ErrorKind::InvalidArgument, "invalid ID token"),
        "TOKEN_EXPIRED" => (ErrorKind::IdTokenExpired, "the ID token has expired"),
        "TENANT_ID_MISMATCH" => (
            ErrorKind::InvalidArgument,
            "tenant id of the token does not match the tenant of the client",
        ),
        "INVALID_DYNAMIC_LINK_DOMAIN" => (
            ErrorKind::InvalidArgument,
            "dynamic link domain is not configured or authorized for the project",
        ),
        "UNAUTHORIZED_DOMAIN" => (
            ErrorKind::InvalidArgument,
            "domain of the continue url is not whitelisted",
        ),
        _ => return None,
    };
    Some(mapped)
}

/// Error parser for Identity Toolkit responses.
///
/// The service reports `{"error": {"message": "CODE : detail"}}`; known codes
/// override the generic classification.
fn auth_error(resp: &Response) -> Error {
    let mut err = platform_error(resp);

    let Ok(envelope) = serde_json::from_slice::<AuthErrorEnvelope>(&resp.body) else {
        return err;
    };
    let (code, detail) = match envelope.error.message.split_once(':') {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (envelope.error.message.trim(), None),
    };

    if let Some((kind, description)) = auth_error_kind(code) {
        let message = match detail {
            Some(detail) if !detail.is_empty() => format!("{description} ({code}): {detail}"),
            _ => format!("{description} ({code})"),
        };
        err = Error::new(kind, message)
            .with_response(resp.to_http_response())
            .with_details(err.details().to_vec());
    }
    err
}


#[cfg(test)]
mod tests {
    use super::testing::auth_client;
    use super::*;
    use crate::test_support::{certificate_map, test_key, PROJECT_ID};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    async fn serve_keys(server: &MockServer, path: &str) {
        server
            .mock_async(|when, then| {
                when.method(GET).path(path.to_owned());
                then.status(200)
                    .header("Cache-Control", "max-age=3600")
                    .json_body(certificate_map("kid-1"));
            })
            .await;
    }

    fn id_token(iat: i64, tenant: Option<&str>, issuer: &str) -> String {
        let mut firebase = json!({"sign_in_provider": "custom", "identities": {}});
        if let Some(tenant) = tenant {
            firebase["tenant"] = json!(tenant);
        }
        let claims = json!({
            "iss": format!("{issuer}{PROJECT_ID}"),
            "aud": PROJECT_ID,
            "sub": "uid1",
            "iat": iat,
            "exp": iat + 3600,
            "auth_time": iat,
            "firebase": firebase,
        });
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("kid-1".into());
        let key = EncodingKey::from_rsa_pem(test_key().private_pem.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    async fn serve_user(server: &MockServer, valid_since: i64) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/projects/{PROJECT_ID}/accounts:lookup"));
                then.status(200).json_body(json!({
                    "users": [{"localId": "uid1", "validSince": valid_since.to_string()}]
                }));
            })
            .await
    }

    #[actix_rt::test]
    async fn revoked_id_token_fails_only_when_checked() {
        let server = MockServer::start_async().await;
        serve_keys(&server, "/id-token-keys").await;
        let iat = token::now_secs() - 100;
        let lookup = serve_user(&server, iat + 10).await;

        let client = auth_client(&server);
        let token = id_token(iat, None, "https://securetoken.google.com/");

        let err = client
            .verify_id_token_and_check_revoked(&token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdTokenRevoked);
        assert!(crate::is_id_token_revoked(&err));
        assert_eq!(lookup.hits_async().await, 1);

        let verified = client.verify_id_token(&token).await.unwrap();
        assert_eq!(verified.uid, "uid1");
        assert_eq!(lookup.hits_async().await, 1);
    }

    #[actix_rt::test]
    async fn unrevoked_token_passes_revocation_check() {
        let server = MockServer::start_async().await;
        serve_keys(&server, "/id-token-keys").await;
        let iat = token::now_secs() - 100;
        serve_user(&server, iat - 10).await;

        let token = id_token(iat, None, "https://securetoken.google.com/");
        let verified = auth_client(&server)
            .verify_id_token_and_check_revoked(&token)
            .await
            .unwrap();
        assert_eq!(verified.uid, "uid1");
    }

    #[actix_rt::test]
    async fn revoked_session_cookie_reports_cookie_kind() {
        let server = MockServer::start_async().await;
        serve_keys(&server, "/session-cookie-keys").await;
        let iat = token::now_secs() - 100;
        serve_user(&server, iat + 10).await;

        let cookie = id_token(iat, None, "https://session.firebase.google.com/");
        let err = auth_client(&server)
            .verify_session_cookie_and_check_revoked(&cookie)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionCookieRevoked);
    }

    #[actix_rt::test]
    async fn expired_token_skips_user_lookup() {
        let server = MockServer::start_async().await;
        serve_keys(&server, "/id-token-keys").await;
        let lookup = serve_user(&server, 0).await;

        let iat = token::now_secs() - 3660;
        let token = id_token(iat, None, "https://securetoken.google.com/");
        let err = auth_client(&server)
            .verify_id_token_and_check_revoked(&token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdTokenExpired);
        assert_eq!(lookup.hits_async().await, 0);
    }

    #[actix_rt::test]
    async fn tenant_client_requires_matching_tenant() {
        let server = MockServer::start_async().await;
        serve_keys(&server, "/id-token-keys").await;
        let client = auth_client(&server);
        let tenant = client.for_tenant("tenant-1").unwrap();
        let iat = token::now_secs();

        let token = id_token(iat, Some("tenant-1"), "https://securetoken.google.com/");
        assert_eq!(
            tenant.verify_id_token(&token).await.unwrap().tenant_id(),
            Some("tenant-1")
        );

        let other = id_token(iat, Some("tenant-2"), "https://securetoken.google.com/");
        assert!(tenant.verify_id_token(&other).await.is_err());

        let untenanted = id_token(iat, None, "https://securetoken.google.com/");
        assert!(tenant.verify_id_token(&untenanted).await.is_err());
        assert!(client.verify_id_token(&other).await.is_ok());

        assert!(client.for_tenant("").is_err());
    }

    #[actix_rt::test]
    async fn creates_session_cookie() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/projects/{PROJECT_ID}:createSessionCookie"))
                    .json_body(json!({"idToken": "id-token", "validDuration": 3600}));
                then.status(200)
                    .json_body(json!({"sessionCookie": "cookie-value"}));
            })
            .await;

        let cookie = auth_client(&server)
            .create_session_cookie("id-token", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(cookie, "cookie-value");
        mock.assert_async().await;
    }

    #[actix_rt::test]
    async fn session_cookie_duration_is_bounded() {
        let server = MockServer::start_async().await;
        let client = auth_client(&server);

        for secs in [60, 15 * 24 * 60 * 60] {
            let err = client
                .create_session_cookie("id-token", Duration::from_secs(secs))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert!(client
            .create_session_cookie("", Duration::from_secs(3600))
            .await
            .is_err());
    }

    #[actix_rt::test]
    async fn revokes_refresh_tokens() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/projects/{PROJECT_ID}/accounts:update"))
                    .body_contains("\"validSince\"")
                    .body_contains("\"localId\":\"uid1\"");
                then.status(200).json_body(json!({"localId": "uid1"}));
            })
            .await;

        auth_client(&server)
            .revoke_refresh_tokens("uid1")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[actix_rt::test]
    async fn maps_identity_toolkit_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/projects/{PROJECT_ID}/accounts"));
                then.status(400).json_body(json!({
                    "error": {"code": 400, "message": "DUPLICATE_EMAIL : the email exists"}
                }));
            })
            .await;

        let err = auth_client(&server)
            .create_user(UserToCreate::new().email("alice@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmailAlreadyExists);
        assert!(err.message().contains("DUPLICATE_EMAIL"));
        assert!(err.message().contains("the email exists"));
        assert_eq!(err.response().unwrap().status.as_u16(), 400);
    }

    #[actix_rt::test]
    async fn unknown_codes_fall_back_to_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path(format!("/v1/projects/{PROJECT_ID}/accounts:delete"));
                then.status(403)
                    .json_body(json!({"error": {"message": "SOMETHING_NEW"}}));
            })
            .await;

        let err = auth_client(&server).delete_user("uid1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[actix_rt::test]
    async fn cancelled_client_fails_fast() {
        let server = MockServer::start_async().await;
        let token = CancellationToken::new();
        token.cancel();

        let err = auth_client(&server)
            .with_cancellation(token)
            .get_user("uid1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
