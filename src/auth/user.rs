use chrono::DateTime;
use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::token::{validate_claims, validate_uid};
use crate::{Error, Result};

/// Pass as a string attribute to [`UserToUpdate`] to delete it.
pub const DELETE_ATTRIBUTE: &str = "";

const MIN_PASSWORD_CHARS: usize = 6;

/// Provider specific information about a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Display name of the user at this provider.
    pub display_name: Option<String>,
    /// Email of the user at this provider.
    pub email: Option<String>,
    /// Phone number of the user at this provider.
    pub phone_number: Option<String>,
    /// Photo URL of the user at this provider.
    pub photo_url: Option<String>,
    /// Provider id, e.g. `google.com`.
    pub provider_id: String,
    /// User id at this provider.
    pub uid: String,
}

/// Timestamps of notable account events, in epoch milliseconds. Zero when unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    /// When the account was created.
    pub creation_timestamp: i64,
    /// When the user last signed in.
    pub last_log_in_timestamp: i64,
    /// When the user last refreshed an ID token.
    pub last_refresh_timestamp: i64,
}

/// A second factor enrolled by a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiFactorInfo {
    /// Id of the enrolled factor
    pub uid: String,
    /// Name the user gave the factor (if any)
    pub display_name: Option<String>,
    /// Enrollment time in epoch milliseconds.
    pub enrollment_timestamp: i64,
    /// Factor type, e.g. `phone`
    pub factor_id: String,
    /// Phone number of a `phone` factor
    pub phone_number: Option<String>,
}

/// A user account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Firebase UID of the user
    pub uid: String,

    /// Primary email address (if set)
    pub email: Option<String>,

    /// Primary phone number in E.164 format (if set)
    pub phone_number: Option<String>,

    /// User's display name (if set)
    pub display_name: Option<String>,

    /// URL to the user's profile picture (if set)
    pub photo_url: Option<String>,

    /// Always `firebase` for user records.
    pub provider_id: String,

    /// Whether the primary email has been verified
    pub email_verified: bool,

    /// Disabled accounts cannot sign in
    pub disabled: bool,

    /// Developer claims set through [`set_custom_user_claims`](crate::auth::AuthClient::set_custom_user_claims).
    pub custom_claims: Map<String, Value>,
    /// Linked identity providers.
    pub provider_user_info: Vec<UserInfo>,
    /// Tokens issued before this instant (epoch milliseconds) are revoked.
    pub tokens_valid_after_millis: i64,

    /// Account timestamps
    pub user_metadata: UserMetadata,

    /// Tenant the account belongs to (multi-tenant projects only)
    pub tenant_id: Option<String>,

    /// Enrolled second factors
    pub multi_factor: Vec<MultiFactorInfo>,
}

/// A user record as returned by [`list_users`](crate::auth::AuthClient::list_users),
/// with password hash material when the credential is allowed to see it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedUserRecord {
    /// The account itself.
    #[serde(flatten)]
    pub user: UserRecord,
    /// Base64 encoded password hash.
    pub password_hash: Option<String>,
    /// Base64 encoded password salt.
    pub password_salt: Option<String>,
}

// Hash value the backend returns when the caller may not read password hashes.
const REDACTED_PASSWORD_HASH: &str = "UkVEQUNURUQ=";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProviderUserInfoResponse {
    #[serde(default)]
    provider_id: String,
    #[serde(default)]
    raw_id: String,
    display_name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
    photo_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MfaEnrollmentResponse {
    #[serde(default)]
    mfa_enrollment_id: String,
    display_name: Option<String>,
    phone_info: Option<String>,
    enrolled_at: Option<String>,
}

/// Wire representation of a user account.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserResponse {
    pub(crate) local_id: String,
    email: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    disabled: bool,
    password_hash: Option<String>,
    salt: Option<String>,
    custom_attributes: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<ProviderUserInfoResponse>,
    valid_since: Option<String>,
    created_at: Option<String>,
    last_login_at: Option<String>,
    last_refresh_at: Option<String>,
    tenant_id: Option<String>,
    #[serde(default)]
    mfa_info: Vec<MfaEnrollmentResponse>,
}

fn parse_millis(field: &str, value: Option<&str>) -> Result<i64> {
    match value {
        None | Some("") => Ok(0),
        Some(value) => value.parse().map_err(|_| {
            Error::new(
                crate::ErrorKind::Unknown,
                format!("failed to parse {field}: {value:?}"),
            )
        }),
    }
}

fn parse_rfc3339_millis(field: &str, value: Option<&str>) -> Result<i64> {
    match value {
        None | Some("") => Ok(0),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.timestamp_millis())
            .map_err(|err| {
                Error::new(
                    crate::ErrorKind::Unknown,
                    format!("failed to parse {field}: {value:?}"),
                )
                .with_source(err)
            }),
    }
}

impl UserResponse {
    pub(crate) fn into_exported(self) -> Result<ExportedUserRecord> {
        let custom_claims = match self.custom_attributes.as_deref() {
            None | Some("") => Map::new(),
            Some(raw) => serde_json::from_str(raw).map_err(|err| {
                Error::new(
                    crate::ErrorKind::Unknown,
                    format!("failed to parse custom claims: {err}"),
                )
                .with_source(err)
            })?,
        };

        let multi_factor = self
            .mfa_info
            .into_iter()
            .map(|mfa| {
                Ok(MultiFactorInfo {
                    uid: mfa.mfa_enrollment_id,
                    display_name: mfa.display_name,
                    enrollment_timestamp: parse_rfc3339_millis(
                        "enrolledAt",
                        mfa.enrolled_at.as_deref(),
                    )?,
                    factor_id: if mfa.phone_info.is_some() {
                        "phone".to_owned()
                    } else {
                        String::new()
                    },
                    phone_number: mfa.phone_info,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // Valid-since is reported in seconds; records expose milliseconds.
        let valid_since = parse_millis("validSince", self.valid_since.as_deref())?;
        let tokens_valid_after_millis = valid_since.checked_mul(1000).ok_or_else(|| {
            Error::new(
                crate::ErrorKind::Unknown,
                format!("validSince out of range: {valid_since}"),
            )
        })?;

        let user = UserRecord {
            uid: self.local_id,
            email: self.email,
            phone_number: self.phone_number,
            display_name: self.display_name,
            photo_url: self.photo_url,
            provider_id: "firebase".to_owned(),
            email_verified: self.email_verified,
            disabled: self.disabled,
            custom_claims,
            provider_user_info: self
                .provider_user_info
                .into_iter()
                .map(|info| UserInfo {
                    display_name: info.display_name,
                    email: info.email,
                    phone_number: info.phone_number,
                    photo_url: info.photo_url,
                    provider_id: info.provider_id,
                    uid: info.raw_id,
                })
                .collect(),
            tokens_valid_after_millis,
            user_metadata: UserMetadata {
                creation_timestamp: parse_millis("createdAt", self.created_at.as_deref())?,
                last_log_in_timestamp: parse_millis("lastLoginAt", self.last_login_at.as_deref())?,
                last_refresh_timestamp: parse_rfc3339_millis(
                    "lastRefreshAt",
                    self.last_refresh_at.as_deref(),
                )?,
            },
            tenant_id: self.tenant_id,
            multi_factor,
        };

        Ok(ExportedUserRecord {
            user,
            password_hash: self
                .password_hash
                .filter(|hash| hash != REDACTED_PASSWORD_HASH),
            password_salt: self.salt,
        })
    }

    pub(crate) fn into_record(self) -> Result<UserRecord> {
        self.into_exported().map(|exported| exported.user)
    }
}

pub(crate) fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(Error::invalid_argument("email must be a non-empty string"));
    }
    if !EmailAddress::is_valid(email) {
        return Err(Error::invalid_argument(format!(
            "malformed email string: {email:?}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: &str) -> Result<()> {
    if phone.is_empty() {
        return Err(Error::invalid_argument(
            "phone number must be a non-empty string",
        ));
    }
    let valid = phone.starts_with('+') && phone[1..].chars().any(char::is_alphanumeric);
    if !valid {
        return Err(Error::invalid_argument(
            "phone number must be a valid, E.164 compliant identifier",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(Error::invalid_argument(
            "password must be a string at least 6 characters long",
        ));
    }
    Ok(())
}

fn validate_display_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument(
            "display name must be a non-empty string",
        ));
    }
    Ok(())
}

pub(crate) fn validate_photo_url(photo_url: &str) -> Result<()> {
    if photo_url.is_empty() {
        return Err(Error::invalid_argument(
            "photo url must be a non-empty string",
        ));
    }
    url::Url::parse(photo_url).map_err(|err| {
        Error::invalid_argument(format!("malformed url string: {err}")).with_source(err)
    })?;
    Ok(())
}

pub(crate) fn validate_provider(provider_id: &str, provider_uid: &str) -> Result<()> {
    if provider_id.is_empty() {
        return Err(Error::invalid_argument("provider id must be a non-empty string"));
    }
    if provider_uid.is_empty() {
        return Err(Error::invalid_argument(
            "provider uid must be a non-empty string",
        ));
    }
    Ok(())
}

/// Properties of a user account to create.
///
/// Unset properties are left for the server to default. A uid is generated
/// by the server unless one is given.
#[derive(Clone, Debug, Default)]
pub struct UserToCreate {
    uid: Option<String>,
    email: Option<String>,
    email_verified: Option<bool>,
    phone_number: Option<String>,
    password: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    disabled: Option<bool>,
}

impl UserToCreate {
    /// An empty request; the server assigns a uid unless [`uid`](Self::uid) is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uid of the new account, 1 to 128 characters.
    #[must_use]
    pub fn uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Primary email address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Marks the email as verified.
    #[must_use]
    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(verified);
        self
    }

    /// Primary phone number in E.164 format.
    #[must_use]
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Initial password, at least 6 characters.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Display name.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Profile photo URL.
    #[must_use]
    pub fn photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Creates the account disabled.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Validates every set property and builds the `accounts` request body.
    pub(crate) fn to_request(&self) -> Result<Map<String, Value>> {
        let mut req = Map::new();
        if let Some(uid) = &self.uid {
            validate_uid(uid)?;
            req.insert("localId".into(), json!(uid));
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
            req.insert("email".into(), json!(email));
        }
        if let Some(phone) = &self.phone_number {
            validate_phone(phone)?;
            req.insert("phoneNumber".into(), json!(phone));
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
            req.insert("password".into(), json!(password));
        }
        if let Some(name) = &self.display_name {
            validate_display_name(name)?;
            req.insert("displayName".into(), json!(name));
        }
        if let Some(photo_url) = &self.photo_url {
            validate_photo_url(photo_url)?;
            req.insert("photoUrl".into(), json!(photo_url));
        }
        if let Some(verified) = self.email_verified {
            req.insert("emailVerified".into(), json!(verified));
        }
        if let Some(disabled) = self.disabled {
            req.insert("disabled".into(), json!(disabled));
        }
        Ok(req)
    }
}

/// Properties of a user account to change.
///
/// Setting `display_name`, `photo_url` or `phone_number` to
/// [`DELETE_ATTRIBUTE`] removes the attribute from the account.
#[derive(Clone, Debug, Default)]
pub struct UserToUpdate {
    email: Option<String>,
    email_verified: Option<bool>,
    phone_number: Option<String>,
    password: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    disabled: Option<bool>,
    custom_claims: Option<Map<String, Value>>,
    valid_since: Option<i64>,
}

impl UserToUpdate {
    /// An update that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// New primary email address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets whether the email is verified.
    #[must_use]
    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(verified);
        self
    }

    /// New phone number; [`DELETE_ATTRIBUTE`] unlinks the phone provider.
    #[must_use]
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// New password, at least 6 characters.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// New display name; [`DELETE_ATTRIBUTE`] clears it.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// New photo URL; [`DELETE_ATTRIBUTE`] clears it.
    #[must_use]
    pub fn photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Disables or re-enables the account.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Replaces the developer claims of the user. An empty map clears them.
    #[must_use]
    pub fn custom_claims(mut self, claims: Map<String, Value>) -> Self {
        self.custom_claims = Some(claims);
        self
    }

    /// Revokes tokens issued before `secs` (epoch seconds).
    #[must_use]
    pub(crate) fn valid_since(mut self, secs: i64) -> Self {
        self.valid_since = Some(secs);
        self
    }

    /// Validates every set property and builds the `accounts:update` request body.
    pub(crate) fn to_request(&self, uid: &str) -> Result<Map<String, Value>> {
        validate_uid(uid)?;

        let mut req = Map::new();
        let mut delete_attributes = Vec::new();
        let mut delete_providers = Vec::new();

        if let Some(email) = &self.email {
            validate_email(email)?;
            req.insert("email".into(), json!(email));
        }
        if let Some(phone) = &self.phone_number {
            if phone == DELETE_ATTRIBUTE {
                delete_providers.push("phone");
            } else {
                validate_phone(phone)?;
                req.insert("phoneNumber".into(), json!(phone));
            }
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
            req.insert("password".into(), json!(password));
        }
        if let Some(name) = &self.display_name {
            if name == DELETE_ATTRIBUTE {
                delete_attributes.push("DISPLAY_NAME");
            } else {
                req.insert("displayName".into(), json!(name));
            }
        }
        if let Some(photo_url) = &self.photo_url {
            if photo_url == DELETE_ATTRIBUTE {
                delete_attributes.push("PHOTO_URL");
            } else {
                validate_photo_url(photo_url)?;
                req.insert("photoUrl".into(), json!(photo_url));
            }
        }
        if let Some(verified) = self.email_verified {
            req.insert("emailVerified".into(), json!(verified));
        }
        if let Some(disabled) = self.disabled {
            req.insert("disableUser".into(), json!(disabled));
        }
        if let Some(claims) = &self.custom_claims {
            let serialized = if claims.is_empty() {
                "{}".to_owned()
            } else {
                validate_claims(claims)?
            };
            req.insert("customAttributes".into(), json!(serialized));
        }
        if let Some(secs) = self.valid_since {
            req.insert("validSince".into(), json!(secs));
        }

        if !delete_attributes.is_empty() {
            req.insert("deleteAttribute".into(), json!(delete_attributes));
        }
        if !delete_providers.is_empty() {
            req.insert("deleteProvider".into(), json!(delete_providers));
        }

        if req.is_empty() {
            return Err(Error::invalid_argument(
                "update parameters must not be empty",
            ));
        }
        req.insert("localId".into(), json!(uid));
        Ok(req)
    }
}

/// Identifies a user in [`get_users`](crate::auth::AuthClient::get_users).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserIdentifier {
    /// Look up by uid.
    Uid(String),
    /// Look up by primary email.
    Email(String),
    /// Look up by primary phone number.
    PhoneNumber(String),
    /// Look up by a linked provider identity.
    Provider {
        /// Provider id, e.g. `google.com`.
        provider_id: String,
        /// User id at that provider.
        provider_uid: String,
    },
}

impl UserIdentifier {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Self::Uid(uid) => validate_uid(uid),
            Self::Email(email) => validate_email(email),
            Self::PhoneNumber(phone) => validate_phone(phone),
            Self::Provider {
                provider_id,
                provider_uid,
            } => validate_provider(provider_id, provider_uid),
        }
    }

    /// Whether `user` is the account this identifier refers to.
    pub(crate) fn matches(&self, user: &UserRecord) -> bool {
        match self {
            Self::Uid(uid) => &user.uid == uid,
            Self::Email(email) => user
                .email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email)),
            Self::PhoneNumber(phone) => user.phone_number.as_deref() == Some(phone.as_str()),
            Self::Provider {
                provider_id,
                provider_uid,
            } => user
                .provider_user_info
                .iter()
                .any(|info| &info.provider_id == provider_id && &info.uid == provider_uid),
        }
    }
}

/// Outcome of [`get_users`](crate::auth::AuthClient::get_users).
#[derive(Clone, Debug, Default)]
pub struct GetUsersResult {
    /// Accounts that were found, in no particular order.
    pub users: Vec<UserRecord>,
    /// Identifiers with no matching account.
    pub not_found: Vec<UserIdentifier>,
}

/// Per-item error of a bulk operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Index of the failed item in the request.
    pub index: usize,
    /// Server supplied reason.
    pub reason: String,
}

/// Keeps one error per index, for indices that refer to one of `len` inputs.
pub(crate) fn errors_in_range(mut errors: Vec<ErrorInfo>, len: usize) -> Vec<ErrorInfo> {
    errors.retain(|err| {
        let in_range = err.index < len;
        if !in_range {
            warn!(index = err.index, len, "Ignoring bulk error outside the request");
        }
        in_range
    });
    errors.sort_by_key(|err| err.index);
    errors.dedup_by_key(|err| err.index);
    errors
}

/// Outcome of [`delete_users`](crate::auth::AuthClient::delete_users).
#[derive(Clone, Debug, Default)]
pub struct DeleteUsersResult {
    /// Number of accounts deleted, including uids that did not exist.
    pub success_count: usize,
    /// Number of uids that could not be deleted.
    pub failure_count: usize,
    /// One entry per failed uid.
    pub errors: Vec<ErrorInfo>,
}

/// One page of [`list_users_page`](crate::auth::AuthClient::list_users_page).
#[derive(Clone, Debug, Default)]
pub struct ListUsersPage {
    /// Accounts on this page.
    pub users: Vec<ExportedUserRecord>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn create_request_contains_set_fields_only() {
        let req = UserToCreate::new()
            .uid("uid1")
            .email("alice@example.com")
            .password("secret-password")
            .disabled(false)
            .to_request()
            .unwrap();

        assert_eq!(
            Value::Object(req),
            json!({
                "localId": "uid1",
                "email": "alice@example.com",
                "password": "secret-password",
                "disabled": false,
            })
        );
    }

    #[test]
    fn create_validates_fields() {
        let cases = [
            UserToCreate::new().uid(""),
            UserToCreate::new().uid("a".repeat(129)),
            UserToCreate::new().email("not-an-email"),
            UserToCreate::new().phone_number("1234"),
            UserToCreate::new().phone_number("+"),
            UserToCreate::new().password("short"),
            UserToCreate::new().display_name(""),
            UserToCreate::new().photo_url("not a url"),
        ];
        for case in cases {
            let err = case.to_request().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{case:?}");
        }
        assert!(UserToCreate::new().to_request().unwrap().is_empty());
    }

    #[test]
    fn update_translates_deletions() {
        let req = UserToUpdate::new()
            .display_name(DELETE_ATTRIBUTE)
            .photo_url(DELETE_ATTRIBUTE)
            .phone_number(DELETE_ATTRIBUTE)
            .disabled(true)
            .to_request("uid1")
            .unwrap();

        assert_eq!(
            Value::Object(req),
            json!({
                "localId": "uid1",
                "deleteAttribute": ["DISPLAY_NAME", "PHOTO_URL"],
                "deleteProvider": ["phone"],
                "disableUser": true,
            })
        );
    }

    #[test]
    fn update_serializes_custom_claims() {
        let claims = json!({"admin": true}).as_object().unwrap().clone();
        let req = UserToUpdate::new()
            .custom_claims(claims)
            .to_request("uid1")
            .unwrap();
        assert_eq!(req["customAttributes"], json!(r#"{"admin":true}"#));

        let req = UserToUpdate::new()
            .custom_claims(Map::new())
            .to_request("uid1")
            .unwrap();
        assert_eq!(req["customAttributes"], json!("{}"));
    }

    #[test]
    fn update_rejects_empty_and_reserved() {
        let err = UserToUpdate::new().to_request("uid1").unwrap_err();
        assert!(err.message().contains("must not be empty"));

        let reserved = json!({"iss": "me"}).as_object().unwrap().clone();
        assert!(UserToUpdate::new()
            .custom_claims(reserved)
            .to_request("uid1")
            .is_err());

        assert!(UserToUpdate::new()
            .email("alice@example.com")
            .to_request("")
            .is_err());
    }

    #[test]
    fn converts_wire_record() {
        let wire: UserResponse = serde_json::from_value(json!({
            "localId": "uid1",
            "email": "alice@example.com",
            "emailVerified": true,
            "passwordHash": "UkVEQUNURUQ=",
            "salt": "c2FsdA==",
            "customAttributes": "{\"admin\":true}",
            "validSince": "1500000000",
            "createdAt": "1400000000000",
            "lastLoginAt": "1500000001000",
            "lastRefreshAt": "2017-07-14T02:40:00.000Z",
            "providerUserInfo": [
                {"providerId": "google.com", "rawId": "g-123", "email": "alice@gmail.com"}
            ],
            "mfaInfo": [
                {"mfaEnrollmentId": "enroll-1", "phoneInfo": "+15555550100",
                 "enrolledAt": "2020-01-01T00:00:00Z"}
            ],
        }))
        .unwrap();

        let exported = wire.into_exported().unwrap();
        let user = &exported.user;
        assert_eq!(user.uid, "uid1");
        assert_eq!(user.provider_id, "firebase");
        assert!(user.email_verified);
        assert_eq!(user.custom_claims["admin"], json!(true));
        assert_eq!(user.tokens_valid_after_millis, 1_500_000_000_000);
        assert_eq!(user.user_metadata.creation_timestamp, 1_400_000_000_000);
        assert_eq!(user.user_metadata.last_log_in_timestamp, 1_500_000_001_000);
        assert_eq!(user.user_metadata.last_refresh_timestamp, 1_500_000_000_000);
        assert_eq!(user.provider_user_info[0].uid, "g-123");
        assert_eq!(user.multi_factor[0].factor_id, "phone");
        assert_eq!(exported.password_hash, None);
        assert_eq!(exported.password_salt.as_deref(), Some("c2FsdA=="));
    }

    #[test]
    fn rejects_out_of_range_valid_since() {
        let wire: UserResponse = serde_json::from_value(json!({
            "localId": "uid1",
            "validSince": i64::MAX.to_string(),
        }))
        .unwrap();

        let err = wire.into_exported().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.message().contains("validSince"));
    }

    #[test]
    fn identifiers_match_records() {
        let user = UserRecord {
            uid: "uid1".into(),
            email: Some("Alice@Example.com".into()),
            provider_user_info: vec![UserInfo {
                provider_id: "google.com".into(),
                uid: "g-123".into(),
                ..UserInfo::default()
            }],
            ..UserRecord::default()
        };

        assert!(UserIdentifier::Uid("uid1".into()).matches(&user));
        assert!(UserIdentifier::Email("alice@example.com".into()).matches(&user));
        assert!(UserIdentifier::Provider {
            provider_id: "google.com".into(),
            provider_uid: "g-123".into()
        }
        .matches(&user));
        assert!(!UserIdentifier::PhoneNumber("+15555550100".into()).matches(&user));
    }
}
