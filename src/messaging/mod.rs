//! Firebase Cloud Messaging: message validation, single and batched sends,
//! and topic subscriptions.

mod android;
mod apns;
mod batch;
mod message;
mod topic;
mod webpush;

use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{platform_error, HttpClient, Request, Response};
use crate::{App, Error, ErrorKind, Result};

pub use android::{
    AndroidConfig, AndroidFcmOptions, AndroidNotification, AndroidPriority, LightSettings,
    NotificationPriority, Visibility,
};
pub use apns::{Alert, ApnsConfig, ApnsFcmOptions, ApnsPayload, Aps, ApsAlert, CriticalSound, Sound};
pub use batch::{BatchResponse, SendResponse};
pub use message::{FcmOptions, Message, MulticastMessage, Notification, Target, MAX_BATCH_SIZE};
pub use topic::{TopicError, TopicManagementResponse};
pub use webpush::{
    Direction, WebpushConfig, WebpushFcmOptions, WebpushNotification, WebpushNotificationAction,
};

use message::is_false;

const FCM_URL: &str = "https://fcm.googleapis.com/v1";
const BATCH_URL: &str = "https://fcm.googleapis.com/batch";
const IID_URL: &str = "https://iid.googleapis.com/iid/v1";

const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";

struct Endpoints {
    send_url: String,
    batch_url: String,
    iid_url: String,
}

/// Client for Firebase Cloud Messaging.
///
/// Cloning is cheap and clones share the connection pool and credentials.
#[derive(Clone)]
pub struct MessagingClient {
    send_url: String,
    batch_url: String,
    iid_url: String,
    fcm: HttpClient,
    iid: HttpClient,
}

impl MessagingClient {
    pub(crate) fn new(app: &App) -> Result<Self> {
        let project_id = app.project_id().ok_or_else(|| {
            Error::invalid_argument(
                "project id is required to access the messaging service; use a service account \
                 credential or set the project id in the config",
            )
        })?;
        Ok(Self::from_parts(
            app.http_client(),
            Endpoints {
                send_url: format!("{FCM_URL}/projects/{project_id}/messages:send"),
                batch_url: BATCH_URL.to_owned(),
                iid_url: IID_URL.to_owned(),
            },
        ))
    }

    fn from_parts(http: HttpClient, endpoints: Endpoints) -> Self {
        let client_header = format!("fire-admin-rust/{}", crate::SDK_VERSION);
        Self {
            send_url: endpoints.send_url,
            batch_url: endpoints.batch_url,
            iid_url: endpoints.iid_url,
            fcm: http
                .clone()
                .with_header("x-goog-api-format-version", "2")
                .with_header("x-firebase-client", &client_header)
                .with_error_parser(fcm_error),
            iid: http
                .with_header("access_token_auth", "true")
                .with_error_parser(iid_error),
        }
    }

    /// Returns a client whose operations abort with
    /// [`ErrorKind::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> MessagingClient {
        Self {
            fcm: self.fcm.clone().with_cancellation(token.clone()),
            iid: self.iid.clone().with_cancellation(token),
            ..self.clone()
        }
    }

    /// Returns a client with a different per-attempt timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> MessagingClient {
        Self {
            fcm: self.fcm.clone().with_timeout(timeout),
            iid: self.iid.clone().with_timeout(timeout),
            ..self.clone()
        }
    }

    /// Sends `message` and returns the message id assigned by FCM.
    pub async fn send(&self, message: &Message) -> Result<String> {
        message.validate()?;
        self.send_validated(message, false).await
    }

    /// Asks FCM to validate `message` without delivering it.
    pub async fn send_dry_run(&self, message: &Message) -> Result<String> {
        message.validate()?;
        self.send_validated(message, true).await
    }

    async fn send_validated(&self, message: &Message, dry_run: bool) -> Result<String> {
        let req = Request::post(&self.send_url).json(SendRequest {
            message,
            validate_only: dry_run,
        })?;
        let resp: SendResult = self.fcm.send_json(&req).await?;
        Ok(resp.name)
    }

    /// Sends each message in its own request. Requests run concurrently and
    /// individual failures are reported in the returned [`BatchResponse`].
    pub async fn send_each(&self, messages: &[Message]) -> Result<BatchResponse> {
        self.send_each_impl(messages, false).await
    }

    /// Like [`send_each`](Self::send_each) in dry run mode.
    pub async fn send_each_dry_run(&self, messages: &[Message]) -> Result<BatchResponse> {
        self.send_each_impl(messages, true).await
    }

    /// Sends `message` to each of its tokens in its own request.
    pub async fn send_each_for_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<BatchResponse> {
        self.send_each_impl(&message.to_messages()?, false).await
    }

    /// Like [`send_each_for_multicast`](Self::send_each_for_multicast) in dry run mode.
    pub async fn send_each_for_multicast_dry_run(
        &self,
        message: &MulticastMessage,
    ) -> Result<BatchResponse> {
        self.send_each_impl(&message.to_messages()?, true).await
    }

    async fn send_each_impl(&self, messages: &[Message], dry_run: bool) -> Result<BatchResponse> {
        validate_batch(messages)?;
        debug!(count = messages.len(), dry_run, "Sending messages individually");

        let results = join_all(
            messages
                .iter()
                .map(|message| self.send_validated(message, dry_run)),
        )
        .await;
        Ok(BatchResponse::new(
            results.into_iter().map(SendResponse::from).collect(),
        ))
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a Message,
    #[serde(skip_serializing_if = "is_false")]
    validate_only: bool,
}

#[derive(Deserialize)]
struct SendResult {
    name: String,
}

fn validate_batch(messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::invalid_argument("messages must not be empty"));
    }
    if messages.len() > MAX_BATCH_SIZE {
        return Err(Error::invalid_argument(format!(
            "messages must not contain more than {MAX_BATCH_SIZE} elements"
        )));
    }
    for (index, message) in messages.iter().enumerate() {
        message
            .validate()
            .map_err(|err| err.context(format!("invalid message at index {index}")))?;
    }
    Ok(())
}

/// Parses FCM errors. A typed `FcmError` detail wins over the top level
/// status, which in turn is narrowed to the messaging kinds.
fn fcm_error(resp: &Response) -> Error {
    let mut err = platform_error(resp);
    let kind = err
        .details()
        .iter()
        .find(|detail| detail.get("@type").and_then(Value::as_str) == Some(FCM_ERROR_TYPE))
        .and_then(|detail| detail.get("errorCode").and_then(Value::as_str))
        .and_then(fcm_error_code)
        .unwrap_or_else(|| messaging_kind(err.kind()));
    err.set_kind(kind);
    err
}

fn fcm_error_code(code: &str) -> Option<ErrorKind> {
    let kind = match code {
        "UNREGISTERED" => ErrorKind::RegistrationTokenNotRegistered,
        "SENDER_ID_MISMATCH" => ErrorKind::MismatchedCredential,
        "QUOTA_EXCEEDED" => ErrorKind::MessageRateExceeded,
        "UNAVAILABLE" => ErrorKind::ServerUnavailable,
        "INTERNAL" => ErrorKind::InternalError,
        "THIRD_PARTY_AUTH_ERROR" => ErrorKind::ThirdPartyAuthError,
        "APNS_AUTH_ERROR" => ErrorKind::InvalidApnsCredentials,
        "INVALID_ARGUMENT" => ErrorKind::InvalidArgument,
        _ => return None,
    };
    Some(kind)
}

fn messaging_kind(kind: ErrorKind) -> ErrorKind {
    match kind {
        ErrorKind::NotFound => ErrorKind::RegistrationTokenNotRegistered,
        ErrorKind::PermissionDenied => ErrorKind::MismatchedCredential,
        ErrorKind::ResourceExhausted => ErrorKind::MessageRateExceeded,
        ErrorKind::Internal => ErrorKind::InternalError,
        ErrorKind::Unavailable => ErrorKind::ServerUnavailable,
        ErrorKind::Unknown => ErrorKind::UnknownError,
        other => other,
    }
}

#[derive(Deserialize)]
struct IidErrorEnvelope {
    error: String,
}

/// Parses IID errors, which carry a bare `{"error": "<code>"}` envelope.
fn iid_error(resp: &Response) -> Error {
    let kind = match resp.status.as_u16() {
        400 => ErrorKind::InvalidArgument,
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::PermissionDenied,
        500 => ErrorKind::InternalError,
        503 => ErrorKind::ServerUnavailable,
        _ => ErrorKind::UnknownError,
    };
    let message = match serde_json::from_slice::<IidErrorEnvelope>(&resp.body) {
        Ok(envelope) => format!("error while calling the iid service: {}", envelope.error),
        Err(_) => format!(
            "unexpected http response with status: {}; body: {}",
            resp.status.as_u16(),
            resp.text()
        ),
    };
    Error::new(kind, message).with_response(resp.to_http_response())
}

#[cfg(test)]
pub(crate) mod testing {
    use httpmock::MockServer;

    use super::*;
    use crate::test_support::{test_http_client, PROJECT_ID};

    /// A client whose FCM and IID endpoints live on `server`.
    pub(crate) fn messaging_client(server: &MockServer) -> MessagingClient {
        MessagingClient::from_parts(
            test_http_client(),
            Endpoints {
                send_url: server.url(format!("/v1/projects/{PROJECT_ID}/messages:send")),
                batch_url: server.url("/batch"),
                iid_url: server.url("/iid/v1"),
            },
        )
    }
}
