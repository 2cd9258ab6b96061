use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::message::validate_topic;
use super::MessagingClient;
use crate::transport::Request;
use crate::{Error, ErrorKind, Result};

const MAX_TOPIC_TOKENS: usize = 1000;

/// A token that could not be (un)subscribed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicError {
    /// Position of the token in the input slice.
    pub index: usize,
    /// Classified reason, e.g. [`ErrorKind::RegistrationTokenNotRegistered`].
    pub kind: ErrorKind,
    /// Stable code of `kind`, e.g. `registration-token-not-registered`.
    pub reason: String,
    /// Code reported by the server, e.g. `NOT_FOUND`.
    pub code: String,
}

/// Result of a topic (un)subscription request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicManagementResponse {
    /// Number of tokens that were (un)subscribed.
    pub success_count: usize,
    /// Number of tokens that failed.
    pub failure_count: usize,
    /// One entry per failed token, in input order.
    pub errors: Vec<TopicError>,
}

#[derive(Serialize)]
struct TopicRequest<'a> {
    to: String,
    registration_tokens: Vec<&'a str>,
}

#[derive(Deserialize)]
struct TopicResponse {
    #[serde(default)]
    results: Vec<TopicResult>,
}

#[derive(Deserialize)]
struct TopicResult {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone, Copy, Debug)]
enum TopicOp {
    Subscribe,
    Unsubscribe,
}

impl TopicOp {
    fn path(self) -> &'static str {
        match self {
            Self::Subscribe => ":batchAdd",
            Self::Unsubscribe => ":batchRemove",
        }
    }
}

fn topic_error_kind(reason: &str) -> ErrorKind {
    match reason {
        "INVALID_ARGUMENT" => ErrorKind::InvalidArgument,
        "NOT_FOUND" => ErrorKind::RegistrationTokenNotRegistered,
        "INTERNAL" => ErrorKind::InternalError,
        "TOO_MANY_TOPICS" => ErrorKind::TooManyTopics,
        _ => ErrorKind::UnknownError,
    }
}

impl TopicManagementResponse {
    fn new(token_count: usize, results: Vec<TopicResult>) -> Self {
        if results.len() > token_count {
            warn!(
                expected = token_count,
                received = results.len(),
                "Ignoring topic results beyond the request"
            );
        }
        let errors: Vec<TopicError> = results
            .into_iter()
            .take(token_count)
            .enumerate()
            .filter_map(|(index, result)| {
                result.error.map(|code| {
                    let kind = topic_error_kind(&code);
                    TopicError {
                        index,
                        kind,
                        reason: kind.as_str().to_owned(),
                        code,
                    }
                })
            })
            .collect();
        Self {
            success_count: token_count.saturating_sub(errors.len()),
            failure_count: errors.len(),
            errors,
        }
    }
}

impl MessagingClient {
    /// Subscribes `tokens` to `topic`.
    ///
    /// Tokens the server rejects are listed in
    /// [`TopicManagementResponse::errors`]; they do not fail the call.
    pub async fn subscribe_to_topic<T: AsRef<str>>(
        &self,
        tokens: &[T],
        topic: &str,
    ) -> Result<TopicManagementResponse> {
        self.manage_topic(TopicOp::Subscribe, tokens, topic).await
    }

    /// Unsubscribes `tokens` from `topic`.
    pub async fn unsubscribe_from_topic<T: AsRef<str>>(
        &self,
        tokens: &[T],
        topic: &str,
    ) -> Result<TopicManagementResponse> {
        self.manage_topic(TopicOp::Unsubscribe, tokens, topic).await
    }

    async fn manage_topic<T: AsRef<str>>(
        &self,
        op: TopicOp,
        tokens: &[T],
        topic: &str,
    ) -> Result<TopicManagementResponse> {
        let tokens: Vec<&str> = tokens.iter().map(AsRef::as_ref).collect();
        validate_tokens(&tokens)?;
        validate_topic(topic)?;

        let to = if topic.starts_with("/topics/") {
            topic.to_owned()
        } else {
            format!("/topics/{topic}")
        };
        debug!(?op, topic = %to, count = tokens.len(), "Managing topic subscriptions");

        let count = tokens.len();
        let req = Request::post(format!("{}{}", self.iid_url, op.path())).json(TopicRequest {
            to,
            registration_tokens: tokens,
        })?;
        let resp: TopicResponse = self.iid.send_json(&req).await?;

        Ok(TopicManagementResponse::new(count, resp.results))
    }
}

fn validate_tokens(tokens: &[&str]) -> Result<()> {
    if tokens.is_empty() {
        return Err(Error::invalid_argument(
            "no registration tokens specified",
        ));
    }
    if tokens.len() > MAX_TOPIC_TOKENS {
        return Err(Error::invalid_argument(format!(
            "tokens list must not contain more than {MAX_TOPIC_TOKENS} items"
        )));
    }
    if tokens.iter().any(|token| token.is_empty()) {
        return Err(Error::invalid_argument("tokens list must not contain empty strings"));
    }
    Ok(())
}
