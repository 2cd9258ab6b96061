use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::Algorithm;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::keys::{key_fetch_error, KeyCache, ID_TOKEN_KEYS_URL, SESSION_COOKIE_KEYS_URL};
use crate::credential::Signer;
use crate::{Error, ErrorKind, Result};

/// Audience of custom tokens.
pub(crate) const CUSTOM_TOKEN_AUDIENCE: &str =
    "https://identitytoolkit.googleapis.com/google.identity.identitytoolkit.v1.IdentityToolkit";

const CUSTOM_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// How far in the future `iat` may be before a token is rejected.
const CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);

const MAX_UID_CHARS: usize = 128;

/// Upper bound on serialized developer claims.
pub(crate) const MAX_CLAIMS_PAYLOAD_BYTES: usize = 1000;

/// Claim names developers may not set.
pub(crate) const RESERVED_CLAIMS: &[&str] = &[
    "acr", "amr", "at_hash", "aud", "auth_time", "azp", "cnf", "c_hash", "exp", "firebase", "iat",
    "iss", "jti", "nbf", "nonce", "sub",
];

/// A verified Firebase ID token or session cookie.
///
/// See: <https://firebase.google.com/docs/auth/admin/verify-id-tokens#verify_id_tokens_using_a_third-party_jwt_library>
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// Issuer of the token.
    pub iss: String,

    /// Audience of the token (the project id).
    pub aud: String,

    /// Subject of the token; equal to [`uid`](Self::uid).
    pub sub: String,

    /// Issued-at time (epoch seconds).
    pub iat: i64,

    /// Expiration time (epoch seconds).
    pub exp: i64,

    /// Time the user authenticated (epoch seconds).
    #[serde(default)]
    pub auth_time: i64,

    /// Firebase UID of the user.
    #[serde(default, skip_deserializing)]
    pub uid: String,

    /// Firebase specific claims.
    #[serde(default)]
    pub firebase: FirebaseInfo,

    /// All remaining claims, including developer claims.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Firebase-specific metadata included in the token under the `firebase` field.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FirebaseInfo {
    /// The main sign-in provider used (e.g., "google.com", "password").
    #[serde(default)]
    pub sign_in_provider: String,

    /// Tenant the user belongs to, for multi-tenant projects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// A map of identity providers to a list of unique IDs (e.g., `{ "google.com": ["1234567890"] }`).
    #[serde(default)]
    pub identities: Map<String, Value>,

    /// Second factor used to sign in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_second_factor: Option<String>,

    /// Identifier of the second factor used to sign in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_factor_identifier: Option<String>,
}

impl Token {
    /// Tenant id of the user, if the token was issued for a tenant.
    pub fn tenant_id(&self) -> Option<&str> {
        self.firebase.tenant.as_deref()
    }

    /// The user's email address.
    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }

    /// Whether the user's email has been verified.
    pub fn email_verified(&self) -> Option<bool> {
        self.claims.get("email_verified").and_then(Value::as_bool)
    }

    /// The user's display name.
    pub fn name(&self) -> Option<&str> {
        self.claims.get("name").and_then(Value::as_str)
    }

    /// URL of the user's profile picture.
    pub fn picture(&self) -> Option<&str> {
        self.claims.get("picture").and_then(Value::as_str)
    }
}

/// The two token flavours accepted by [`TokenVerifier`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenKind {
    IdToken,
    SessionCookie,
}

impl TokenKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::IdToken => "ID token",
            Self::SessionCookie => "session cookie",
        }
    }

    fn issuer_prefix(self) -> &'static str {
        match self {
            Self::IdToken => "https://securetoken.google.com/",
            Self::SessionCookie => "https://session.firebase.google.com/",
        }
    }

    fn docs(self) -> &'static str {
        match self {
            Self::IdToken => {
                "See https://firebase.google.com/docs/auth/admin/verify-id-tokens for details \
                 on how to retrieve a valid ID token."
            }
            Self::SessionCookie => {
                "See https://firebase.google.com/docs/auth/admin/manage-cookies for details \
                 on how to retrieve a valid session cookie."
            }
        }
    }

    pub(crate) fn keys_url(self) -> &'static str {
        match self {
            Self::IdToken => ID_TOKEN_KEYS_URL,
            Self::SessionCookie => SESSION_COOKIE_KEYS_URL,
        }
    }

    fn expired_kind(self) -> ErrorKind {
        match self {
            Self::IdToken => ErrorKind::IdTokenExpired,
            Self::SessionCookie => ErrorKind::SessionCookieExpired,
        }
    }

    pub(crate) fn revoked_kind(self) -> ErrorKind {
        match self {
            Self::IdToken => ErrorKind::IdTokenRevoked,
            Self::SessionCookie => ErrorKind::SessionCookieRevoked,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtHeader {
    #[serde(default)]
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Verifies ID tokens or session cookies against a project.
///
/// Claims are checked before the signature so that malformed or foreign
/// tokens never trigger a key fetch. In emulator mode neither the issuer nor
/// the signature is checked. Expiry is compared without clock skew.
pub(crate) struct TokenVerifier {
    kind: TokenKind,
    project_id: String,
    keys: KeyCache,
    emulator: bool,
}

impl TokenVerifier {
    pub(crate) fn new(
        kind: TokenKind,
        project_id: impl Into<String>,
        keys: KeyCache,
        emulator: bool,
    ) -> Self {
        Self {
            kind,
            project_id: project_id.into(),
            keys,
            emulator,
        }
    }

    pub(crate) fn kind(&self) -> TokenKind {
        self.kind
    }

    pub(crate) async fn verify(&self, token: &str) -> Result<Token> {
        let name = self.kind.name();
        if token.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{name} must be a non-empty string"
            )));
        }

        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, signature] = segments.as_slice() else {
            return Err(Error::invalid_argument(format!(
                "{name} must have 3 segments separated by dots; {}",
                self.kind.docs()
            )));
        };

        let header: JwtHeader = decode_segment(header, name, "header")?;
        let mut verified: Token = decode_segment(payload, name, "payload")?;
        verified.uid.clone_from(&verified.sub);

        let kid = self.check_header(&header, &verified)?;
        self.check_claims(&verified, now_secs())?;

        if self.emulator {
            return Ok(verified);
        }

        let key = self
            .keys
            .get(&kid)
            .await
            .map_err(key_fetch_error)?
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{name} has 'kid' claim which does not correspond to a known public key; \
                     most likely the {name} is expired, so get a fresh token from your client \
                     app and try again"
                ))
            })?;

        let signing_input = &token[..token.len() - signature.len() - 1];
        let valid = jsonwebtoken::crypto::verify(
            signature,
            signing_input.as_bytes(),
            &key,
            Algorithm::RS256,
        )
        .unwrap_or(false);
        if !valid {
            return Err(Error::invalid_argument(format!(
                "failed to verify {name} signature"
            )));
        }

        debug!(uid = %verified.uid, "Verified {name}");
        Ok(verified)
    }

    fn check_header(&self, header: &JwtHeader, token: &Token) -> Result<String> {
        let name = self.kind.name();
        if self.emulator {
            return Ok(header.kid.clone().unwrap_or_default());
        }

        let kid = match header.kid.as_deref() {
            Some(kid) if !kid.is_empty() => kid.to_owned(),
            _ if token.aud == CUSTOM_TOKEN_AUDIENCE => {
                return Err(Error::invalid_argument(format!(
                    "expected {name} but got a custom token"
                )))
            }
            _ => {
                return Err(Error::invalid_argument(format!(
                    "{name} has no 'kid' header"
                )))
            }
        };

        if header.alg != "RS256" {
            return Err(Error::invalid_argument(format!(
                "{name} has invalid algorithm; expected 'RS256' but got '{}'; {}",
                header.alg,
                self.kind.docs()
            )));
        }
        Ok(kid)
    }

    fn check_claims(&self, token: &Token, now: i64) -> Result<()> {
        let name = self.kind.name();
        let docs = self.kind.docs();

        if token.aud != self.project_id {
            if token.aud == CUSTOM_TOKEN_AUDIENCE {
                return Err(Error::invalid_argument(format!(
                    "expected {name} but got a custom token"
                )));
            }
            return Err(Error::invalid_argument(format!(
                "{name} has invalid 'aud' (audience) claim; expected {:?} but got {:?}; \
                 make sure the {name} comes from the same Firebase project as the credential \
                 used to initialize this SDK; {docs}",
                self.project_id, token.aud
            )));
        }

        let issuer = format!("{}{}", self.kind.issuer_prefix(), self.project_id);
        if !self.emulator && token.iss != issuer {
            return Err(Error::invalid_argument(format!(
                "{name} has invalid 'iss' (issuer) claim; expected {issuer:?} but got {:?}; \
                 make sure the {name} comes from the same Firebase project as the credential \
                 used to initialize this SDK; {docs}",
                token.iss
            )));
        }

        let skew = i64::try_from(CLOCK_SKEW.as_secs()).unwrap_or(i64::MAX);
        if token.iat > now + skew {
            return Err(Error::invalid_argument(format!(
                "{name} issued at future timestamp: {}",
                token.iat
            )));
        }

        if token.exp <= now {
            return Err(Error::new(
                self.kind.expired_kind(),
                format!(
                    "{name} has expired at: {}; get a fresh token from your client app and \
                     try again",
                    token.exp
                ),
            ));
        }

        if token.sub.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{name} has empty 'sub' (subject) claim; {docs}"
            )));
        }
        if token.sub.chars().count() > MAX_UID_CHARS {
            return Err(Error::invalid_argument(format!(
                "{name} has a 'sub' (subject) claim longer than {MAX_UID_CHARS} characters; \
                 {docs}"
            )));
        }

        Ok(())
    }
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str, part: &str) -> Result<T> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|err| {
            Error::invalid_argument(format!("failed to decode {name} {part}: {err}"))
                .with_source(err)
        })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        Error::invalid_argument(format!("failed to parse {name} {part}: {err}")).with_source(err)
    })
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Validates a uid: non-empty and at most 128 characters.
pub(crate) fn validate_uid(uid: &str) -> Result<()> {
    if uid.is_empty() {
        return Err(Error::invalid_argument("uid must be a non-empty string"));
    }
    if uid.chars().count() > MAX_UID_CHARS {
        return Err(Error::invalid_argument(format!(
            "uid string must not be longer than {MAX_UID_CHARS} characters"
        )));
    }
    Ok(())
}

/// Checks developer claims and returns their JSON serialization.
pub(crate) fn validate_claims(claims: &Map<String, Value>) -> Result<String> {
    let serialized = serde_json::to_string(claims)?;
    if serialized.len() > MAX_CLAIMS_PAYLOAD_BYTES {
        return Err(Error::invalid_argument(format!(
            "serialized custom claims must not exceed {MAX_CLAIMS_PAYLOAD_BYTES} characters"
        )));
    }

    let mut reserved: Vec<&str> = claims
        .keys()
        .map(String::as_str)
        .filter(|key| RESERVED_CLAIMS.contains(key))
        .collect();
    if !reserved.is_empty() {
        reserved.sort_unstable();
        return Err(Error::invalid_argument(format!(
            "developer claims {} are reserved and cannot be specified",
            reserved.join(", ")
        )));
    }

    Ok(serialized)
}

#[derive(Serialize)]
struct CustomTokenHeader<'a> {
    alg: &'a str,
    typ: &'static str,
}

#[derive(Serialize)]
struct CustomTokenPayload<'a> {
    aud: &'static str,
    iss: &'a str,
    sub: &'a str,
    uid: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
}

/// Mints a custom token that client apps exchange for an ID token.
pub(crate) async fn mint_custom_token(
    signer: &dyn Signer,
    uid: &str,
    claims: Option<&Map<String, Value>>,
    tenant_id: Option<&str>,
) -> Result<String> {
    validate_uid(uid)?;
    let claims = claims.filter(|claims| !claims.is_empty());
    if let Some(claims) = claims {
        validate_claims(claims)?;
    }

    let email = signer.email().await?;
    let iat = now_secs();
    let lifetime = i64::try_from(CUSTOM_TOKEN_LIFETIME.as_secs()).unwrap_or(i64::MAX);

    let header = CustomTokenHeader {
        alg: signer.algorithm(),
        typ: "JWT",
    };
    let payload = CustomTokenPayload {
        aud: CUSTOM_TOKEN_AUDIENCE,
        iss: &email,
        sub: &email,
        uid,
        iat,
        exp: iat + lifetime,
        claims,
        tenant_id,
    };

    let signing_input = format!(
        "{}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
    );
    let signature = signer.sign(signing_input.as_bytes()).await?;
    Ok(format!(
        "{signing_input}.{}",
        BASE64_URL_SAFE_NO_PAD.encode(signature)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{EmulatorSigner, LocalSigner};
    use crate::test_support::{
        certificate_map, other_key, test_http_client, test_key, test_service_account, CLIENT_EMAIL,
        PROJECT_ID,
    };
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use jsonwebtoken::{encode, DecodingKey, EncodingKey, Header};
    use serde_json::json;

    const KID: &str = "kid-1";

    async fn key_server() -> MockServer {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/keys");
                then.status(200)
                    .header("Cache-Control", "max-age=3600")
                    .json_body(certificate_map(KID));
            })
            .await;
        server
    }

    fn verifier(server: &MockServer, kind: TokenKind) -> TokenVerifier {
        TokenVerifier::new(
            kind,
            PROJECT_ID,
            KeyCache::new(server.url("/keys"), test_http_client()),
            false,
        )
    }

    fn id_token_claims() -> Value {
        let now = now_secs();
        json!({
            "iss": format!("https://securetoken.google.com/{PROJECT_ID}"),
            "aud": PROJECT_ID,
            "sub": "uid1",
            "user_id": "uid1",
            "iat": now - 10,
            "exp": now + 3600,
            "auth_time": now - 10,
            "email": "alice@example.com",
            "firebase": {
                "sign_in_provider": "password",
                "identities": {"email": ["alice@example.com"]},
            },
            "admin": true,
        })
    }

    fn sign(claims: &Value, kid: Option<&str>, private_pem: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_owned);
        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    fn signed(claims: &Value) -> String {
        sign(claims, Some(KID), &test_key().private_pem)
    }

    #[actix_rt::test]
    async fn verifies_valid_id_token() {
        let server = key_server().await;
        let token = verifier(&server, TokenKind::IdToken)
            .verify(&signed(&id_token_claims()))
            .await
            .unwrap();

        assert_eq!(token.uid, "uid1");
        assert_eq!(token.firebase.sign_in_provider, "password");
        assert_eq!(token.email(), Some("alice@example.com"));
        assert_eq!(token.claims["admin"], json!(true));
        assert_eq!(token.tenant_id(), None);
    }

    #[actix_rt::test]
    async fn expired_token_reports_expired_kind() {
        let server = key_server().await;
        let mut claims = id_token_claims();
        claims["exp"] = json!(now_secs() - 60);

        let err = verifier(&server, TokenKind::IdToken)
            .verify(&signed(&claims))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdTokenExpired);

        let mut cookie = claims.clone();
        cookie["iss"] = json!(format!("https://session.firebase.google.com/{PROJECT_ID}"));
        let err = verifier(&server, TokenKind::SessionCookie)
            .verify(&signed(&cookie))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionCookieExpired);
    }

    #[actix_rt::test]
    async fn rejects_foreign_audience_and_issuer() {
        let server = key_server().await;
        let v = verifier(&server, TokenKind::IdToken);

        let mut claims = id_token_claims();
        claims["aud"] = json!("other-project");
        let err = v.verify(&signed(&claims)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("'aud'"));

        let mut claims = id_token_claims();
        claims["iss"] = json!("https://securetoken.google.com/other-project");
        let err = v.verify(&signed(&claims)).await.unwrap_err();
        assert!(err.message().contains("'iss'"));
    }

    #[actix_rt::test]
    async fn session_cookie_requires_session_issuer() {
        let server = key_server().await;
        let err = verifier(&server, TokenKind::SessionCookie)
            .verify(&signed(&id_token_claims()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let mut cookie = id_token_claims();
        cookie["iss"] = json!(format!("https://session.firebase.google.com/{PROJECT_ID}"));
        let token = verifier(&server, TokenKind::SessionCookie)
            .verify(&signed(&cookie))
            .await
            .unwrap();
        assert_eq!(token.uid, "uid1");
    }

    #[actix_rt::test]
    async fn tolerates_small_clock_skew_on_iat() {
        let server = key_server().await;
        let v = verifier(&server, TokenKind::IdToken);

        let mut claims = id_token_claims();
        claims["iat"] = json!(now_secs() + 60);
        assert!(v.verify(&signed(&claims)).await.is_ok());

        claims["iat"] = json!(now_secs() + 3600);
        let err = v.verify(&signed(&claims)).await.unwrap_err();
        assert!(err.message().contains("future"));
    }

    #[actix_rt::test]
    async fn rejects_bad_subjects() {
        let server = key_server().await;
        let v = verifier(&server, TokenKind::IdToken);

        let mut claims = id_token_claims();
        claims["sub"] = json!("");
        assert!(v.verify(&signed(&claims)).await.is_err());

        claims["sub"] = json!("a".repeat(129));
        let err = v.verify(&signed(&claims)).await.unwrap_err();
        assert!(err.message().contains("128"));
    }

    #[actix_rt::test]
    async fn rejects_missing_kid_and_wrong_algorithm() {
        let server = key_server().await;
        let v = verifier(&server, TokenKind::IdToken);

        let token = sign(&id_token_claims(), None, &test_key().private_pem);
        let err = v.verify(&token).await.unwrap_err();
        assert!(err.message().contains("no 'kid'"));

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(KID.into());
        let token = encode(
            &header,
            &id_token_claims(),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        let err = v.verify(&token).await.unwrap_err();
        assert!(err.message().contains("invalid algorithm"));
    }

    #[actix_rt::test]
    async fn rejects_signature_from_other_key() {
        let server = key_server().await;
        let token = sign(&id_token_claims(), Some(KID), &other_key().private_pem);
        let err = verifier(&server, TokenKind::IdToken)
            .verify(&token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("signature"));
    }

    #[actix_rt::test]
    async fn rejects_unknown_kid() {
        let server = key_server().await;
        let token = sign(&id_token_claims(), Some("unknown"), &test_key().private_pem);
        let err = verifier(&server, TokenKind::IdToken)
            .verify(&token)
            .await
            .unwrap_err();
        assert!(err.message().contains("known public key"));
    }

    #[actix_rt::test]
    async fn rejects_malformed_tokens() {
        let server = key_server().await;
        let v = verifier(&server, TokenKind::IdToken);

        for token in ["", "not.a.jwt", "only.two", "a.b.c.d"] {
            let err = v.verify(token).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{token}");
        }
    }

    #[actix_rt::test]
    async fn key_fetch_failure_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/keys");
                then.status(500).body("boom");
            })
            .await;

        let err = verifier(&server, TokenKind::IdToken)
            .verify(&signed(&id_token_claims()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CertificateFetchFailed);
    }

    #[actix_rt::test]
    async fn emulator_mode_skips_signature_and_issuer() {
        let server = MockServer::start_async().await;
        let v = TokenVerifier::new(
            TokenKind::IdToken,
            PROJECT_ID,
            KeyCache::new(server.url("/keys"), test_http_client()),
            true,
        );

        let unsigned = format!(
            "{}.{}.",
            BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
            BASE64_URL_SAFE_NO_PAD.encode(id_token_claims().to_string())
        );
        let token = v.verify(&unsigned).await.unwrap();
        assert_eq!(token.uid, "uid1");

        let mut claims = id_token_claims();
        claims["iss"] = json!("https://emulator.local/other-project");
        let foreign_issuer = format!(
            "{}.{}.",
            BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
            BASE64_URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        assert!(v.verify(&foreign_issuer).await.is_ok());

        claims["aud"] = json!("other-project");
        let foreign_audience = format!(
            "{}.{}.",
            BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#),
            BASE64_URL_SAFE_NO_PAD.encode(claims.to_string())
        );
        assert!(v.verify(&foreign_audience).await.is_err());
    }

    fn decode_custom_token(token: &str) -> Value {
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        let valid = jsonwebtoken::crypto::verify(
            parts[2],
            format!("{}.{}", parts[0], parts[1]).as_bytes(),
            &DecodingKey::from_rsa_pem(&test_key().public_pem).unwrap(),
            Algorithm::RS256,
        )
        .unwrap();
        assert!(valid, "custom token signature must verify");
        serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap()
    }

    #[actix_rt::test]
    async fn mints_custom_token_with_claims() {
        let (account, _) = test_service_account("https://oauth2.googleapis.com/token");
        let signer = LocalSigner::new(&account).unwrap();
        let claims = json!({"premium": true, "level": 3});

        let token = mint_custom_token(&signer, "uid1", claims.as_object(), None)
            .await
            .unwrap();

        let header: Value = serde_json::from_slice(
            &BASE64_URL_SAFE_NO_PAD
                .decode(token.split('.').next().unwrap())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(header, json!({"alg": "RS256", "typ": "JWT"}));

        let payload = decode_custom_token(&token);
        assert_eq!(payload["uid"], "uid1");
        assert_eq!(payload["claims"], claims);
        assert_eq!(payload["iss"], CLIENT_EMAIL);
        assert_eq!(payload["sub"], CLIENT_EMAIL);
        assert_eq!(payload["aud"], CUSTOM_TOKEN_AUDIENCE);
        assert_eq!(
            payload["exp"].as_i64().unwrap() - payload["iat"].as_i64().unwrap(),
            3600
        );
        assert!(payload.get("tenant_id").is_none());
    }

    #[actix_rt::test]
    async fn custom_token_carries_tenant() {
        let (account, _) = test_service_account("https://oauth2.googleapis.com/token");
        let signer = LocalSigner::new(&account).unwrap();
        let token = mint_custom_token(&signer, "uid1", None, Some("tenant-1"))
            .await
            .unwrap();

        let payload = decode_custom_token(&token);
        assert_eq!(payload["tenant_id"], "tenant-1");
        assert!(payload.get("claims").is_none());
    }

    #[actix_rt::test]
    async fn custom_token_validates_inputs() {
        let (account, _) = test_service_account("https://oauth2.googleapis.com/token");
        let signer = LocalSigner::new(&account).unwrap();

        let err = mint_custom_token(&signer, "", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert!(mint_custom_token(&signer, &"a".repeat(128), None, None)
            .await
            .is_ok());
        assert!(mint_custom_token(&signer, &"a".repeat(129), None, None)
            .await
            .is_err());

        let reserved = json!({"sub": "x", "aud": "y"});
        let err = mint_custom_token(&signer, "uid1", reserved.as_object(), None)
            .await
            .unwrap_err();
        assert!(err.message().contains("aud, sub"));

        let large = json!({"blob": "x".repeat(1001)});
        let err = mint_custom_token(&signer, "uid1", large.as_object(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[actix_rt::test]
    async fn custom_token_is_rejected_by_id_token_verifier() {
        let server = key_server().await;
        let (account, _) = test_service_account("https://oauth2.googleapis.com/token");
        let signer = LocalSigner::new(&account).unwrap();
        let token = mint_custom_token(&signer, "uid1", None, None).await.unwrap();

        let err = verifier(&server, TokenKind::IdToken)
            .verify(&token)
            .await
            .unwrap_err();
        assert!(err.message().contains("custom token"));
    }

    #[actix_rt::test]
    async fn emulator_signer_produces_unsigned_token() {
        let token = mint_custom_token(&EmulatorSigner, "uid1", None, None)
            .await
            .unwrap();
        assert!(token.ends_with('.'));

        let header = token.split('.').next().unwrap();
        let header: Value =
            serde_json::from_slice(&BASE64_URL_SAFE_NO_PAD.decode(header).unwrap()).unwrap();
        assert_eq!(header["alg"], "none");
    }
}
