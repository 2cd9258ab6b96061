use std::collections::VecDeque;

use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::token::validate_uid;
use super::user::{
    errors_in_range, validate_email, validate_phone, validate_provider, DeleteUsersResult, ErrorInfo,
    ExportedUserRecord, GetUsersResult, ListUsersPage, UserIdentifier, UserRecord, UserResponse,
    UserToCreate, UserToUpdate,
};
use super::AuthClient;
use crate::transport::Request;
use crate::{Error, ErrorKind, Result};

/// Page size used by [`AuthClient::list_users`] and the upper bound for
/// [`AuthClient::list_users_page`].
pub(crate) const MAX_LIST_USERS_RESULTS: usize = 1000;
const MAX_GET_USERS_IDENTIFIERS: usize = 100;
const MAX_DELETE_USERS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<UserResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalIdResponse {
    local_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListUsersResponse {
    #[serde(default)]
    users: Vec<UserResponse>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchDeleteError {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    local_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct BatchDeleteResponse {
    #[serde(default)]
    errors: Vec<BatchDeleteError>,
}

impl AuthClient {
    fn stamp_tenant(&self, mut user: UserRecord) -> UserRecord {
        if user.tenant_id.is_none() {
            user.tenant_id = self.tenant_id.clone();
        }
        user
    }

    async fn lookup(&self, query: Value) -> Result<Vec<UserResponse>> {
        let req = Request::post(self.project_url("/accounts:lookup")).json(query)?;
        let resp: LookupResponse = self.http().send_json(&req).await?;
        Ok(resp.users)
    }

    async fn get_user_by(&self, query: Value, description: String) -> Result<UserRecord> {
        let user = self.lookup(query).await?.into_iter().next().ok_or_else(|| {
            Error::new(
                ErrorKind::UserNotFound,
                format!("cannot find user from {description}"),
            )
        })?;
        Ok(self.stamp_tenant(user.into_record()?))
    }

    /// Looks up a user by uid.
    pub async fn get_user(&self, uid: &str) -> Result<UserRecord> {
        validate_uid(uid)?;
        self.get_user_by(json!({"localId": [uid]}), format!("uid: {uid:?}"))
            .await
    }

    /// Looks up a user by email address.
    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        validate_email(email)?;
        self.get_user_by(json!({"email": [email]}), format!("email: {email:?}"))
            .await
    }

    /// Looks up a user by E.164 phone number.
    pub async fn get_user_by_phone_number(&self, phone: &str) -> Result<UserRecord> {
        validate_phone(phone)?;
        self.get_user_by(
            json!({"phoneNumber": [phone]}),
            format!("phone number: {phone:?}"),
        )
        .await
    }

    /// Looks up a user by the uid assigned to them by a federated provider.
    pub async fn get_user_by_provider_uid(
        &self,
        provider_id: &str,
        provider_uid: &str,
    ) -> Result<UserRecord> {
        // Phone and email are not federated identities.
        match provider_id {
            "phone" => return self.get_user_by_phone_number(provider_uid).await,
            "email" => return self.get_user_by_email(provider_uid).await,
            _ => {}
        }

        validate_provider(provider_id, provider_uid)?;
        self.get_user_by(
            json!({"federatedUserId": [{"providerId": provider_id, "rawId": provider_uid}]}),
            format!("provider: {provider_id:?}, uid: {provider_uid:?}"),
        )
        .await
    }

    /// Looks up several users at once.
    ///
    /// Duplicate identifiers are looked up once. Identifiers that match no
    /// account are returned in [`GetUsersResult::not_found`].
    pub async fn get_users(&self, identifiers: &[UserIdentifier]) -> Result<GetUsersResult> {
        if identifiers.len() > MAX_GET_USERS_IDENTIFIERS {
            return Err(Error::invalid_argument(format!(
                "`identifiers` parameter must have <= {MAX_GET_USERS_IDENTIFIERS} entries"
            )));
        }

        let mut unique: Vec<&UserIdentifier> = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            identifier.validate()?;
            if !unique.contains(&identifier) {
                unique.push(identifier);
            }
        }
        if unique.is_empty() {
            return Ok(GetUsersResult::default());
        }

        let mut local_ids = Vec::new();
        let mut emails = Vec::new();
        let mut phones = Vec::new();
        let mut federated = Vec::new();
        for identifier in &unique {
            match identifier {
                UserIdentifier::Uid(uid) => local_ids.push(json!(uid)),
                UserIdentifier::Email(email) => emails.push(json!(email)),
                UserIdentifier::PhoneNumber(phone) => phones.push(json!(phone)),
                UserIdentifier::Provider {
                    provider_id,
                    provider_uid,
                } => federated.push(json!({"providerId": provider_id, "rawId": provider_uid})),
            }
        }

        let mut query = Map::new();
        for (key, values) in [
            ("localId", local_ids),
            ("email", emails),
            ("phoneNumber", phones),
            ("federatedUserId", federated),
        ] {
            if !values.is_empty() {
                query.insert(key.to_owned(), Value::Array(values));
            }
        }

        let users = self
            .lookup(Value::Object(query))
            .await?
            .into_iter()
            .map(|user| user.into_record().map(|user| self.stamp_tenant(user)))
            .collect::<Result<Vec<_>>>()?;

        let not_found = unique
            .into_iter()
            .filter(|identifier| !users.iter().any(|user| identifier.matches(user)))
            .cloned()
            .collect();

        Ok(GetUsersResult { users, not_found })
    }

    /// Fetches one page of users.
    ///
    /// `max_results` must be in `1..=1000`. Pass the returned
    /// [`next_page_token`](ListUsersPage::next_page_token) to fetch the next page.
    pub async fn list_users_page(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<ListUsersPage> {
        if max_results == 0 || max_results > MAX_LIST_USERS_RESULTS {
            return Err(Error::invalid_argument(format!(
                "max results must be between 1 and {MAX_LIST_USERS_RESULTS}"
            )));
        }

        let mut req = Request::get(self.project_url("/accounts:batchGet"))
            .query("maxResults", max_results.to_string());
        if let Some(token) = page_token {
            if token.is_empty() {
                return Err(Error::invalid_argument("page token must not be empty"));
            }
            req = req.query("nextPageToken", token);
        }

        let resp: ListUsersResponse = self.http().send_json(&req).await?;
        let users = resp
            .users
            .into_iter()
            .map(|user| {
                let mut exported = user.into_exported()?;
                exported.user = self.stamp_tenant(exported.user);
                Ok(exported)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ListUsersPage {
            users,
            next_page_token: resp.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    /// Streams every user, starting after `page_token` if given.
    ///
    /// Pages are fetched lazily as the stream is polled. An error ends the
    /// stream. Mixing this stream with manual [`list_users_page`](Self::list_users_page)
    /// calls on the same token is not supported.
    pub fn list_users(
        &self,
        page_token: Option<String>,
    ) -> impl Stream<Item = Result<ExportedUserRecord>> + Send + 'static {
        struct State {
            client: AuthClient,
            buffer: VecDeque<ExportedUserRecord>,
            page_token: Option<String>,
            done: bool,
        }

        let state = State {
            client: self.clone(),
            buffer: VecDeque::new(),
            page_token,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(user) = state.buffer.pop_front() {
                    return Some((Ok(user), state));
                }
                if state.done {
                    return None;
                }

                let page = state
                    .client
                    .list_users_page(MAX_LIST_USERS_RESULTS, state.page_token.as_deref())
                    .await;
                match page {
                    Ok(page) => {
                        debug!(count = page.users.len(), "Fetched page of users");
                        state.buffer.extend(page.users);
                        state.done = page.next_page_token.is_none();
                        state.page_token = page.next_page_token;
                    }
                    Err(err) => {
                        state.done = true;
                        return Some((Err(err), state));
                    }
                }
            }
        })
    }

    /// Creates a user and returns the stored record.
    pub async fn create_user(&self, user: UserToCreate) -> Result<UserRecord> {
        let body = user.to_request()?;
        let req = Request::post(self.project_url("/accounts")).json(body)?;
        let resp: LocalIdResponse = self.http().send_json(&req).await?;
        if resp.local_id.is_empty() {
            return Err(Error::new(
                ErrorKind::Unknown,
                "failed to create new user: empty uid in response",
            ));
        }
        self.get_user(&resp.local_id).await
    }

    pub(crate) async fn update_user_request(&self, uid: &str, user: &UserToUpdate) -> Result<()> {
        let body = user.to_request(uid)?;
        let req = Request::post(self.project_url("/accounts:update")).json(body)?;
        let resp: LocalIdResponse = self.http().send_json(&req).await?;
        if resp.local_id.is_empty() {
            return Err(Error::new(
                ErrorKind::Unknown,
                "failed to update user: empty uid in response",
            ));
        }
        Ok(())
    }

    /// Updates a user and returns the stored record.
    pub async fn update_user(&self, uid: &str, user: UserToUpdate) -> Result<UserRecord> {
        self.update_user_request(uid, &user).await?;
        self.get_user(uid).await
    }

    /// Replaces the developer claims of a user. `None` clears them.
    ///
    /// Claims propagate to the user's ID tokens on the next refresh.
    pub async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: Option<Map<String, Value>>,
    ) -> Result<()> {
        let update = UserToUpdate::new().custom_claims(claims.unwrap_or_default());
        self.update_user_request(uid, &update).await
    }

    /// Deletes a user.
    pub async fn delete_user(&self, uid: &str) -> Result<()> {
        validate_uid(uid)?;
        let req = Request::post(self.project_url("/accounts:delete")).json(json!({"localId": uid}))?;
        self.http().send(&req).await?;
        Ok(())
    }

    /// Deletes up to 1000 users in one call.
    ///
    /// Unknown uids count as successes. Per-user failures are reported in the
    /// result; the call itself only fails if the request is rejected.
    pub async fn delete_users(&self, uids: &[String]) -> Result<DeleteUsersResult> {
        if uids.len() > MAX_DELETE_USERS {
            return Err(Error::invalid_argument(format!(
                "`uids` parameter must have <= {MAX_DELETE_USERS} entries"
            )));
        }
        for uid in uids {
            validate_uid(uid)?;
        }
        if uids.is_empty() {
            return Ok(DeleteUsersResult::default());
        }

        let req = Request::post(self.project_url("/accounts:batchDelete"))
            .json(json!({"localIds": uids, "force": true}))?;
        let resp: BatchDeleteResponse = self.http().send_json(&req).await?;

        let errors = errors_in_range(
            resp.errors
                .into_iter()
                .map(|err| ErrorInfo {
                    index: err.index,
                    reason: format!("Error deleting user {:?}: {}", err.local_id, err.message),
                })
                .collect(),
            uids.len(),
        );

        Ok(DeleteUsersResult {
            success_count: uids.len().saturating_sub(errors.len()),
            failure_count: errors.len(),
            errors,
        })
    }
}
