use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::token::{validate_claims, validate_uid};
use super::user::{
    errors_in_range, validate_email, validate_phone, validate_photo_url, ErrorInfo,
};
use super::AuthClient;
use crate::transport::Request;
use crate::{Error, Result};

const MAX_IMPORT_USERS: usize = 1000;

/// A linked provider identity of a [`UserToImport`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProvider {
    /// Provider id, e.g. `google.com`.
    pub provider_id: String,
    /// User id at the provider.
    pub uid: String,
    /// Email at the provider.
    pub email: Option<String>,
    /// Display name at the provider.
    pub display_name: Option<String>,
    /// Photo URL at the provider.
    pub photo_url: Option<String>,
}

/// A user account to import, including an optional pre-hashed password.
#[derive(Clone, Debug, Default)]
pub struct UserToImport {
    uid: String,
    email: Option<String>,
    email_verified: Option<bool>,
    display_name: Option<String>,
    photo_url: Option<String>,
    phone_number: Option<String>,
    disabled: Option<bool>,
    password_hash: Option<Vec<u8>>,
    password_salt: Option<Vec<u8>>,
    custom_claims: Option<Map<String, Value>>,
    provider_data: Vec<UserProvider>,
    creation_timestamp: Option<i64>,
    last_log_in_timestamp: Option<i64>,
}

impl UserToImport {
    /// A user with the given uid and no other attributes.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
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

    /// Primary phone number in E.164 format.
    #[must_use]
    pub fn phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = Some(phone.into());
        self
    }

    /// Imports the account disabled.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Password hash computed with the algorithm passed to
    /// [`AuthClient::import_users`].
    #[must_use]
    pub fn password_hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    /// Salt used when the password hash was computed.
    #[must_use]
    pub fn password_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.password_salt = Some(salt.into());
        self
    }

    /// Developer claims, at most 1000 bytes serialized.
    #[must_use]
    pub fn custom_claims(mut self, claims: Map<String, Value>) -> Self {
        self.custom_claims = Some(claims);
        self
    }

    /// Linked provider identities.
    #[must_use]
    pub fn provider_data(mut self, providers: Vec<UserProvider>) -> Self {
        self.provider_data = providers;
        self
    }

    /// Account creation time in epoch milliseconds.
    #[must_use]
    pub fn creation_timestamp(mut self, millis: i64) -> Self {
        self.creation_timestamp = Some(millis);
        self
    }

    /// Last sign-in time in epoch milliseconds.
    #[must_use]
    pub fn last_log_in_timestamp(mut self, millis: i64) -> Self {
        self.last_log_in_timestamp = Some(millis);
        self
    }

    fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    fn to_request(&self) -> Result<Value> {
        validate_uid(&self.uid)?;

        let mut user = Map::new();
        user.insert("localId".into(), json!(self.uid));
        if let Some(email) = &self.email {
            validate_email(email)?;
            user.insert("email".into(), json!(email));
        }
        if let Some(verified) = self.email_verified {
            user.insert("emailVerified".into(), json!(verified));
        }
        if let Some(name) = &self.display_name {
            user.insert("displayName".into(), json!(name));
        }
        if let Some(photo_url) = &self.photo_url {
            validate_photo_url(photo_url)?;
            user.insert("photoUrl".into(), json!(photo_url));
        }
        if let Some(phone) = &self.phone_number {
            validate_phone(phone)?;
            user.insert("phoneNumber".into(), json!(phone));
        }
        if let Some(disabled) = self.disabled {
            user.insert("disabled".into(), json!(disabled));
        }
        if let Some(hash) = &self.password_hash {
            user.insert(
                "passwordHash".into(),
                json!(BASE64_URL_SAFE_NO_PAD.encode(hash)),
            );
        }
        if let Some(salt) = &self.password_salt {
            user.insert("salt".into(), json!(BASE64_URL_SAFE_NO_PAD.encode(salt)));
        }
        if let Some(claims) = self.custom_claims.as_ref().filter(|c| !c.is_empty()) {
            user.insert("customAttributes".into(), json!(validate_claims(claims)?));
        }
        if !self.provider_data.is_empty() {
            let providers = self
                .provider_data
                .iter()
                .map(|provider| {
                    if provider.provider_id.is_empty() {
                        return Err(Error::invalid_argument(
                            "user provider must have a non-empty provider id",
                        ));
                    }
                    if provider.uid.is_empty() {
                        return Err(Error::invalid_argument(
                            "user provider must have a non-empty uid",
                        ));
                    }
                    let mut entry = Map::new();
                    entry.insert("providerId".into(), json!(provider.provider_id));
                    entry.insert("rawId".into(), json!(provider.uid));
                    if let Some(email) = &provider.email {
                        validate_email(email)?;
                        entry.insert("email".into(), json!(email));
                    }
                    if let Some(name) = &provider.display_name {
                        entry.insert("displayName".into(), json!(name));
                    }
                    if let Some(photo_url) = &provider.photo_url {
                        validate_photo_url(photo_url)?;
                        entry.insert("photoUrl".into(), json!(photo_url));
                    }
                    Ok(Value::Object(entry))
                })
                .collect::<Result<Vec<_>>>()?;
            user.insert("providerUserInfo".into(), Value::Array(providers));
        }
        if let Some(created) = self.creation_timestamp {
            user.insert("createdAt".into(), json!(created));
        }
        if let Some(last_login) = self.last_log_in_timestamp {
            user.insert("lastLoginAt".into(), json!(last_login));
        }
        Ok(Value::Object(user))
    }
}

/// Algorithm used to hash the passwords of imported users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UserImportHash {
    /// HMAC-SHA512.
    HmacSha512 {
        /// Signer key.
        key: Vec<u8>,
    },
    /// HMAC-SHA256.
    HmacSha256 {
        /// Signer key.
        key: Vec<u8>,
    },
    /// HMAC-SHA1.
    HmacSha1 {
        /// Signer key.
        key: Vec<u8>,
    },
    /// HMAC-MD5.
    HmacMd5 {
        /// Signer key.
        key: Vec<u8>,
    },
    /// MD5.
    Md5 {
        /// In `0..=8192`.
        rounds: u32,
    },
    /// SHA-1.
    Sha1 {
        /// In `1..=8192`.
        rounds: u32,
    },
    /// SHA-256.
    Sha256 {
        /// In `1..=8192`.
        rounds: u32,
    },
    /// SHA-512.
    Sha512 {
        /// In `1..=8192`.
        rounds: u32,
    },
    /// PBKDF-SHA1.
    PbkdfSha1 {
        /// In `0..=120000`.
        rounds: u32,
    },
    /// PBKDF2-SHA256.
    Pbkdf2Sha256 {
        /// In `0..=120000`.
        rounds: u32,
    },
    /// Firebase's modified scrypt, with the parameters shown in the console.
    Scrypt {
        /// Signer key.
        key: Vec<u8>,
        /// Salt separator.
        salt_separator: Vec<u8>,
        /// In `1..=8`.
        rounds: u32,
        /// In `1..=14`.
        memory_cost: u32,
    },
    /// Standard scrypt.
    StandardScrypt {
        /// Block size (`r`).
        block_size: u32,
        /// Parallelization (`p`).
        parallelization: u32,
        /// CPU and memory cost (`N`).
        memory_cost: u32,
        /// Length of the derived key in bytes.
        derived_key_length: u32,
    },
    /// Bcrypt; the cost is embedded in each hash.
    Bcrypt,
}

fn check_rounds(name: &str, rounds: u32, min: u32, max: u32) -> Result<()> {
    if rounds < min || rounds > max {
        return Err(Error::invalid_argument(format!(
            "rounds must be between {min} and {max} for {name}"
        )));
    }
    Ok(())
}

fn check_key(name: &str, key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument(format!(
            "signer key not specified for {name}"
        )));
    }
    Ok(())
}

impl UserImportHash {
    /// Validates the parameters and returns the hash fields of the upload request.
    fn to_request(&self) -> Result<Map<String, Value>> {
        let mut req = Map::new();
        let mut set = |key: &str, value: Value| {
            req.insert(key.to_owned(), value);
        };

        match self {
            Self::HmacSha512 { key }
            | Self::HmacSha256 { key }
            | Self::HmacSha1 { key }
            | Self::HmacMd5 { key } => {
                let name = self.algorithm();
                check_key(name, key)?;
                set("hashAlgorithm", json!(name));
                set("signerKey", json!(BASE64_URL_SAFE_NO_PAD.encode(key)));
            }
            Self::Md5 { rounds } => {
                check_rounds("MD5", *rounds, 0, 8192)?;
                set("hashAlgorithm", json!(self.algorithm()));
                set("rounds", json!(rounds));
            }
            Self::Sha1 { rounds } | Self::Sha256 { rounds } | Self::Sha512 { rounds } => {
                let name = self.algorithm();
                check_rounds(name, *rounds, 1, 8192)?;
                set("hashAlgorithm", json!(name));
                set("rounds", json!(rounds));
            }
            Self::PbkdfSha1 { rounds } | Self::Pbkdf2Sha256 { rounds } => {
                let name = self.algorithm();
                check_rounds(name, *rounds, 0, 120_000)?;
                set("hashAlgorithm", json!(name));
                set("rounds", json!(rounds));
            }
            Self::Scrypt {
                key,
                salt_separator,
                rounds,
                memory_cost,
            } => {
                check_key("SCRYPT", key)?;
                check_rounds("SCRYPT", *rounds, 1, 8)?;
                if !(1..=14).contains(memory_cost) {
                    return Err(Error::invalid_argument(
                        "memory cost must be between 1 and 14",
                    ));
                }
                set("hashAlgorithm", json!("SCRYPT"));
                set("signerKey", json!(BASE64_URL_SAFE_NO_PAD.encode(key)));
                set("rounds", json!(rounds));
                set("memoryCost", json!(memory_cost));
                if !salt_separator.is_empty() {
                    set(
                        "saltSeparator",
                        json!(BASE64_URL_SAFE_NO_PAD.encode(salt_separator)),
                    );
                }
            }
            Self::StandardScrypt {
                block_size,
                parallelization,
                memory_cost,
                derived_key_length,
            } => {
                set("hashAlgorithm", json!("STANDARD_SCRYPT"));
                set("blockSize", json!(block_size));
                set("parallelization", json!(parallelization));
                set("cpuMemCost", json!(memory_cost));
                set("dkLen", json!(derived_key_length));
            }
            Self::Bcrypt => set("hashAlgorithm", json!("BCRYPT")),
        }
        Ok(req)
    }

    fn algorithm(&self) -> &'static str {
        match self {
            Self::HmacSha512 { .. } => "HMAC_SHA512",
            Self::HmacSha256 { .. } => "HMAC_SHA256",
            Self::HmacSha1 { .. } => "HMAC_SHA1",
            Self::HmacMd5 { .. } => "HMAC_MD5",
            Self::Md5 { .. } => "MD5",
            Self::Sha1 { .. } => "SHA1",
            Self::Sha256 { .. } => "SHA256",
            Self::Sha512 { .. } => "SHA512",
            Self::PbkdfSha1 { .. } => "PBKDF_SHA1",
            Self::Pbkdf2Sha256 { .. } => "PBKDF2_SHA256",
            Self::Scrypt { .. } => "SCRYPT",
            Self::StandardScrypt { .. } => "STANDARD_SCRYPT",
            Self::Bcrypt => "BCRYPT",
        }
    }
}

/// Outcome of [`AuthClient::import_users`].
#[derive(Clone, Debug, Default)]
pub struct UserImportResult {
    /// Number of accounts imported.
    pub success_count: usize,
    /// Number of accounts rejected.
    pub failure_count: usize,
    /// One entry per rejected account, indexed into the input slice.
    pub errors: Vec<ErrorInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadError {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    error: Vec<UploadError>,
}

impl AuthClient {
    /// Imports up to 1000 users in one call.
    ///
    /// `hash` is required if any user carries a password hash and applies to
    /// all of them. Per-user failures are reported in the result.
    pub async fn import_users(
        &self,
        users: &[UserToImport],
        hash: Option<&UserImportHash>,
    ) -> Result<UserImportResult> {
        if users.is_empty() {
            return Err(Error::invalid_argument("users list must not be empty"));
        }
        if users.len() > MAX_IMPORT_USERS {
            return Err(Error::invalid_argument(format!(
                "users list must not contain more than {MAX_IMPORT_USERS} items"
            )));
        }

        let encoded = users
            .iter()
            .map(UserToImport::to_request)
            .collect::<Result<Vec<_>>>()?;

        let mut req = match (users.iter().any(UserToImport::has_password), hash) {
            (true, None) => {
                return Err(Error::invalid_argument(
                    "hash algorithm option is required to import users with passwords",
                ))
            }
            (_, Some(hash)) => hash.to_request()?,
            (false, None) => Map::new(),
        };
        req.insert("users".into(), Value::Array(encoded));

        let req = Request::post(self.project_url("/accounts:batchCreate")).json(req)?;
        let resp: UploadResponse = self.http().send_json(&req).await?;

        let errors = errors_in_range(
            resp.error
                .into_iter()
                .map(|err| ErrorInfo {
                    index: err.index,
                    reason: err.message,
                })
                .collect(),
            users.len(),
        );

        Ok(UserImportResult {
            success_count: users.len().saturating_sub(errors.len()),
            failure_count: errors.len(),
            errors,
        })
    }
}
