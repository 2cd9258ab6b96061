use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

use super::{linked_identity, IdpError};
use crate::auth::{Token, UserRecord};

/// Provider id Firebase records for Google sign-ins.
pub const GOOGLE_IDP_ID: &str = "google.com";

const GOOGLE_IDP_NAME: &str = "Google";

/// The Google account id linked to a Firebase user.
///
/// Obtained from a verified [`Token`] (its `firebase.identities` claim) or
/// from a [`UserRecord`] fetched through the user manager (its provider
/// data). Both carry the same id for the same account.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct GoogleUserId(String);

impl GoogleUserId {
    /// The account id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for GoogleUserId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for GoogleUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn missing() -> IdpError {
    IdpError::MissingIdpClaims {
        provider: GOOGLE_IDP_NAME,
    }
}

impl TryFrom<&Token> for GoogleUserId {
    type Error = IdpError;

    fn try_from(token: &Token) -> Result<Self, Self::Error> {
        linked_identity(token, GOOGLE_IDP_ID)
            .map(|id| GoogleUserId(id.to_owned()))
            .ok_or_else(missing)
    }
}

impl TryFrom<&UserRecord> for GoogleUserId {
    type Error = IdpError;

    fn try_from(user: &UserRecord) -> Result<Self, Self::Error> {
        user.provider_user_info
            .iter()
            .find(|info| info.provider_id == GOOGLE_IDP_ID && !info.uid.is_empty())
            .map(|info| GoogleUserId(info.uid.clone()))
            .ok_or_else(missing)
    }
}
