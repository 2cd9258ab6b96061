use actix_web::error::InternalError;
use actix_web::http::{header, StatusCode};
use actix_web::{dev, http::header::Header, web, FromRequest, HttpRequest};
use actix_web::{HttpResponse, ResponseError};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use futures::future::{ready, FutureExt, LocalBoxFuture};
use tracing::warn;

use crate::auth::{AuthClient, Token};
use crate::{Error, ErrorKind};

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_string())
    }

    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::InvalidArgument
            | ErrorKind::InvalidEmail
            | ErrorKind::InvalidPhoneNumber
            | ErrorKind::InvalidPassword
            | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,

            ErrorKind::Unauthenticated
            | ErrorKind::IdTokenExpired
            | ErrorKind::IdTokenRevoked
            | ErrorKind::SessionCookieExpired
            | ErrorKind::SessionCookieRevoked
            | ErrorKind::InvalidApnsCredentials
            | ErrorKind::ThirdPartyAuthError => StatusCode::UNAUTHORIZED,

            ErrorKind::PermissionDenied
            | ErrorKind::InsufficientPermission
            | ErrorKind::MismatchedCredential => StatusCode::FORBIDDEN,

            ErrorKind::NotFound
            | ErrorKind::UserNotFound
            | ErrorKind::TenantNotFound
            | ErrorKind::ConfigurationNotFound
            | ErrorKind::RegistrationTokenNotRegistered => StatusCode::NOT_FOUND,

            ErrorKind::Conflict
            | ErrorKind::Aborted
            | ErrorKind::EmailAlreadyExists
            | ErrorKind::PhoneNumberAlreadyExists
            | ErrorKind::UidAlreadyExists => StatusCode::CONFLICT,

            ErrorKind::FailedPrecondition => StatusCode::PRECONDITION_FAILED,

            ErrorKind::ResourceExhausted
            | ErrorKind::MessageRateExceeded
            | ErrorKind::TooManyTopics => StatusCode::TOO_MANY_REQUESTS,

            ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,

            // Upstream failures: the remote service could not be reached or
            // answered with an error of its own.
            ErrorKind::CertificateFetchFailed
            | ErrorKind::NetworkError
            | ErrorKind::Unavailable
            | ErrorKind::ServerUnavailable => StatusCode::BAD_GATEWAY,

            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Verifies the bearer ID token of the request with the [`AuthClient`]
/// registered as `web::Data<AuthClient>`.
impl FromRequest for Token {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut dev::Payload) -> Self::Future {
        let Some(auth) = req.app_data::<web::Data<AuthClient>>().cloned() else {
            warn!("AuthClient is not registered as application data");
            return ready(Err(internal_token_verification_error())).boxed_local();
        };

        let bearer = match Authorization::<Bearer>::parse(req) {
            Ok(header) => header.into_scheme(),
            Err(_) => {
                // Per RFC 7235, a 401 Unauthorized response MUST be returned when the
                // Authorization header is missing, malformed, or uses an unsupported scheme.
                //
                // Actix defaults to 400 Bad Request for parsing failures, which is incorrect
                // in the context of authentication. We explicitly return 401 and include a
                // WWW-Authenticate header to guide the client on how to authenticate.
                return ready(Err(missing_or_malformed_auth_header())).boxed_local();
            }
        };

        let id_token = bearer.token().to_owned();

        async move {
            match auth.verify_id_token(&id_token).await {
                Ok(token) => Ok(token),
                Err(err) if err.is(ErrorKind::CertificateFetchFailed) => {
                    warn!("Token verification failed: {err}");
                    Err(internal_token_verification_error())
                }
                Err(err) => Err(invalid_token_error(&err)),
            }
        }
        .boxed_local()
    }
}

fn internal_token_verification_error() -> actix_web::Error {
    let response =
        HttpResponse::InternalServerError().body("Internal error during token verification");

    InternalError::from_response("token_verification_failure", response).into()
}

fn missing_or_malformed_auth_header() -> actix_web::Error {
    unauthorized_with_www_authenticate(
        "invalid_request",
        "Authorization header missing or not using Bearer scheme",
        "Authorization header is missing or malformed",
    )
}

fn invalid_token_error(err: &Error) -> actix_web::Error {
    unauthorized_with_www_authenticate(
        "invalid_token",
        err.message(),
        format!("Failed to verify Firebase ID token: {err}"),
    )
}

/// Constructs a generic `actix_web::Error` with a `WWW-Authenticate` header.
fn unauthorized_with_www_authenticate(
    www_error_code: &str,
    www_error_description: &str,
    body: impl Into<String>,
) -> actix_web::Error {
    let header_value = format!(
        r#"Bearer realm="firebase", error="{www_error_code}", error_description="{}""#,
        www_error_description.replace('"', "'")
    );

    let response = HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, header_value))
        .body(body.into());

    InternalError::from_response("auth_error", response).into()
}
