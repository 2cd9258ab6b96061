use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;

/// A crate-wide result type alias using the custom [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Closed set of error kinds surfaced by this crate.
///
/// The generic platform kinds are produced by the HTTP transport from status
/// codes and response envelopes. Service-specific kinds override them when the
/// remote service reports a more precise code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Generic platform kinds.
    /// The request carried an invalid argument. Also used for local validation failures.
    InvalidArgument,
    /// The request could not be authenticated.
    Unauthenticated,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// The requested resource does not exist.
    NotFound,
    /// The request conflicts with the current state of the resource.
    Conflict,
    /// A quota or rate limit was exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically due to a concurrency issue.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented by the server.
    Unimplemented,
    /// An internal server error.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// An error that could not be classified.
    Unknown,

    // Transport kinds.
    /// The operation was cancelled through its cancellation token.
    Cancelled,
    /// The request deadline expired before the operation completed.
    DeadlineExceeded,
    /// The request never reached the server or the connection failed.
    NetworkError,

    // Auth and token kinds.
    /// The ID token has expired.
    IdTokenExpired,
    /// The ID token has been revoked.
    IdTokenRevoked,
    /// The session cookie has expired.
    SessionCookieExpired,
    /// The session cookie has been revoked.
    SessionCookieRevoked,
    /// Public signing keys could not be fetched.
    CertificateFetchFailed,
    /// The credential lacks the permission required by the operation.
    InsufficientPermission,

    // User management kinds.
    /// No user record matches the given identifier.
    UserNotFound,
    /// The email address is already in use by another account.
    EmailAlreadyExists,
    /// The phone number is already in use by another account.
    PhoneNumberAlreadyExists,
    /// The uid is already in use by another account.
    UidAlreadyExists,
    /// The email address was rejected by the server.
    InvalidEmail,
    /// The phone number was rejected by the server.
    InvalidPhoneNumber,
    /// The password was rejected by the server.
    InvalidPassword,
    /// The tenant does not exist.
    TenantNotFound,
    /// The project configuration does not exist.
    ConfigurationNotFound,

    // Messaging kinds.
    /// The registration token is not (or no longer) registered.
    RegistrationTokenNotRegistered,
    /// The credential does not belong to the sender of the registration token.
    MismatchedCredential,
    /// The APNs certificate or auth key was rejected.
    InvalidApnsCredentials,
    /// The sending rate exceeded the allowed quota.
    MessageRateExceeded,
    /// The messaging service is temporarily unavailable.
    ServerUnavailable,
    /// The messaging service encountered an internal error.
    InternalError,
    /// A third-party push service rejected the credentials.
    ThirdPartyAuthError,
    /// The registration token is subscribed to too many topics.
    TooManyTopics,
    /// The messaging service returned an unrecognised error.
    UnknownError,
}

impl ErrorKind {
    /// Returns the stable, kebab-case code of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid-argument",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission-denied",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::ResourceExhausted => "resource-exhausted",
            Self::FailedPrecondition => "failed-precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out-of-range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data-loss",
            Self::Unknown => "unknown",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline-exceeded",
            Self::NetworkError => "network-error",
            Self::IdTokenExpired => "id-token-expired",
            Self::IdTokenRevoked => "id-token-revoked",
            Self::SessionCookieExpired => "session-cookie-expired",
            Self::SessionCookieRevoked => "session-cookie-revoked",
            Self::CertificateFetchFailed => "certificate-fetch-failed",
            Self::InsufficientPermission => "insufficient-permission",
            Self::UserNotFound => "user-not-found",
            Self::EmailAlreadyExists => "email-already-exists",
            Self::PhoneNumberAlreadyExists => "phone-already-exists",
            Self::UidAlreadyExists => "uid-already-exists",
            Self::InvalidEmail => "invalid-email",
            Self::InvalidPhoneNumber => "invalid-phone",
            Self::InvalidPassword => "invalid-password",
            Self::TenantNotFound => "tenant-not-found",
            Self::ConfigurationNotFound => "configuration-not-found",
            Self::RegistrationTokenNotRegistered => "registration-token-not-registered",
            Self::MismatchedCredential => "mismatched-credential",
            Self::InvalidApnsCredentials => "invalid-apns-credentials",
            Self::MessageRateExceeded => "message-rate-exceeded",
            Self::ServerUnavailable => "server-unavailable",
            Self::InternalError => "internal-error",
            Self::ThirdPartyAuthError => "third-party-auth-error",
            Self::TooManyTopics => "too-many-topics",
            Self::UnknownError => "unknown-error",
        }
    }

    /// Maps a canonical GCP status string (e.g. `NOT_FOUND`) to a generic kind.
    pub fn from_platform_status(status: &str) -> Option<ErrorKind> {
        let kind = match status {
            "INVALID_ARGUMENT" => Self::InvalidArgument,
            "UNAUTHENTICATED" => Self::Unauthenticated,
            "PERMISSION_DENIED" => Self::PermissionDenied,
            "NOT_FOUND" => Self::NotFound,
            "ALREADY_EXISTS" | "CONFLICT" => Self::Conflict,
            "RESOURCE_EXHAUSTED" => Self::ResourceExhausted,
            "FAILED_PRECONDITION" => Self::FailedPrecondition,
            "ABORTED" => Self::Aborted,
            "OUT_OF_RANGE" => Self::OutOfRange,
            "UNIMPLEMENTED" => Self::Unimplemented,
            "INTERNAL" => Self::Internal,
            "UNAVAILABLE" => Self::Unavailable,
            "DATA_LOSS" => Self::DataLoss,
            "DEADLINE_EXCEEDED" => Self::DeadlineExceeded,
            "CANCELLED" => Self::Cancelled,
            "UNKNOWN" => Self::Unknown,
            _ => return None,
        };
        Some(kind)
    }

    /// Maps an HTTP status code to a generic kind.
    pub fn from_http_status(status: StatusCode) -> ErrorKind {
        match status.as_u16() {
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::Conflict,
            412 => Self::FailedPrecondition,
            416 => Self::OutOfRange,
            429 => Self::ResourceExhausted,
            500 => Self::Internal,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A buffered HTTP response attached to an [`Error`].
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the body as lossy UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Unified error type for all SDK operations.
///
/// Every error carries an [`ErrorKind`]. Errors produced from an HTTP exchange
/// also carry the buffered response and any structured `details` the server
/// returned. Local validation errors have no response.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    response: Option<HttpResponse>,
    details: Vec<Value>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            response: None,
            details: Vec::new(),
            source: None,
        }
    }

    /// Shorthand for a local `invalid-argument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub(crate) fn with_response(mut self, response: HttpResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub(crate) fn with_details(mut self, details: Vec<Value>) -> Self {
        self.details = details;
        self
    }

    pub(crate) fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Wraps this error with additional context, preserving its kind.
    ///
    /// The original error becomes the [`source`](std::error::Error::source) of
    /// the returned one, so the predicate helpers still find it.
    #[must_use]
    pub fn context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            message: message.into(),
            response: None,
            details: Vec::new(),
            source: Some(Box::new(self)),
        }
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human readable message without the status and code decorations.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The buffered HTTP response, if the error came from a remote call.
    ///
    /// For wrapped errors this looks through the context chain.
    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref().or_else(|| {
            self.source
                .as_deref()
                .and_then(|source| source.downcast_ref::<Error>())
                .and_then(Error::response)
        })
    }

    /// Structured error details returned by the server.
    pub fn details(&self) -> &[Value] {
        &self.details
    }

    pub(crate) fn set_kind(&mut self, kind: ErrorKind) {
        self.kind = kind;
    }

    /// Returns `true` if this error, or any error in its source chain, has `kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        has_kind(self, kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.response {
            Some(resp) => write!(
                f,
                "http error status: {}; reason: {}; code: {}",
                resp.status.as_u16(),
                self.message,
                self.kind
            ),
            None => write!(f, "{}; code: {}", self.message, self.kind),
        }
    }
}

impl From<crate::auth::PublicKeysError> for Error {
    fn from(err: crate::auth::PublicKeysError) -> Self {
        Error::new(
            ErrorKind::CertificateFetchFailed,
            format!("failed to fetch public key certificates: {err}"),
        )
        .with_source(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Unknown, format!("failed to process JSON: {err}")).with_source(err)
    }
}

/// Walks the source chain of `err` looking for a crate [`Error`] of `kind`.
pub fn has_kind(err: &(dyn std::error::Error + 'static), kind: ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ours) = e.downcast_ref::<Error>() {
            if ours.kind == kind {
                return true;
            }
        }
        current = e.source();
    }
    false
}

macro_rules! kind_predicates {
    ($($(#[$doc:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(err: &(dyn std::error::Error + 'static)) -> bool {
                has_kind(err, ErrorKind::$kind)
            }
        )*
    };
}

kind_predicates! {
    /// Checks if the error chain contains an `invalid-argument` error.
    is_invalid_argument => InvalidArgument;
    /// Checks if the error chain contains an `unauthenticated` error.
    is_unauthenticated => Unauthenticated;
    /// Checks if the error chain contains a `not-found` error.
    is_not_found => NotFound;
    /// Checks if the error chain contains an `internal` error.
    is_internal => Internal;
    /// Checks if the error chain contains an `unavailable` error.
    is_unavailable => Unavailable;
    /// Checks if the error chain contains a `cancelled` error.
    is_cancelled => Cancelled;
    /// Checks if the error chain contains a `deadline-exceeded` error.
    is_deadline_exceeded => DeadlineExceeded;
    /// Checks if the error chain contains an `id-token-expired` error.
    is_id_token_expired => IdTokenExpired;
    /// Checks if the error chain contains an `id-token-revoked` error.
    is_id_token_revoked => IdTokenRevoked;
    /// Checks if the error chain contains a `session-cookie-expired` error.
    is_session_cookie_expired => SessionCookieExpired;
    /// Checks if the error chain contains a `session-cookie-revoked` error.
    is_session_cookie_revoked => SessionCookieRevoked;
    /// Checks if the error chain contains a `certificate-fetch-failed` error.
    is_certificate_fetch_failed => CertificateFetchFailed;
    /// Checks if the error chain contains a `user-not-found` error.
    is_user_not_found => UserNotFound;
    /// Checks if the error chain contains an `email-already-exists` error.
    is_email_already_exists => EmailAlreadyExists;
    /// Checks if the error chain contains a `uid-already-exists` error.
    is_uid_already_exists => UidAlreadyExists;
    /// Checks if the error chain contains a `registration-token-not-registered` error.
    is_registration_token_not_registered => RegistrationTokenNotRegistered;
    /// Checks if the error chain contains a `message-rate-exceeded` error.
    is_message_rate_exceeded => MessageRateExceeded;
    /// Checks if the error chain contains an `internal-error` messaging error.
    is_messaging_internal => InternalError;
    /// Checks if the error chain contains a `server-unavailable` error.
    is_server_unavailable => ServerUnavailable;
}
