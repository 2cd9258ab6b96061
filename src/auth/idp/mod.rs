//! Provider specific identities of verified tokens and user records.

mod error;
#[cfg(feature = "idp-google")]
pub mod google;

pub use error::IdpError;

use crate::auth::Token;

/// First non-empty account id `provider_id` lists in the token's
/// `firebase.identities` claim.
#[cfg_attr(not(feature = "idp-google"), expect(dead_code))]
pub(crate) fn linked_identity<'a>(token: &'a Token, provider_id: &str) -> Option<&'a str> {
    token
        .firebase
        .identities
        .get(provider_id)?
        .as_array()?
        .iter()
        .filter_map(serde_json::Value::as_str)
        .find(|id| !id.is_empty())
}
