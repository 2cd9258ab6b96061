use thiserror::Error;

/// Failure to read a provider identity from a token or user record.
#[derive(Debug, Error)]
pub enum IdpError {
    /// The account has no identity linked for the provider.
    ///
    /// For tokens this means the provider key of `firebase.identities` is
    /// absent or lists no string id, e.g. when the user signed up with email
    /// and never linked `{"google.com": ["108359285117457"]}`.
    #[error("no linked `{provider}` identity on the account")]
    MissingIdpClaims {
        /// Display name of the provider, e.g. `Google`.
        provider: &'static str,
    },
}

impl From<IdpError> for crate::Error {
    fn from(err: IdpError) -> Self {
        crate::Error::new(crate::ErrorKind::InvalidArgument, err.to_string()).with_source(err)
    }
}

#[cfg(feature = "actix")]
impl actix_web::ResponseError for IdpError {
    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(self.status_code()).json(self.to_string())
    }

    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            IdpError::MissingIdpClaims { .. } => actix_web::http::StatusCode::FORBIDDEN,
        }
    }
}
