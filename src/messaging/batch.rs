//! Batched sends over a single `multipart/mixed` request.
//!
//! Every part of the request body embeds a complete HTTP/1.1 request to the
//! send endpoint. The response mirrors it: one embedded HTTP response per
//! part, in request order.

use std::fmt::Write as _;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{
    fcm_error, validate_batch, Message, MessagingClient, MulticastMessage, SendRequest, SendResult,
};
use crate::transport::{Request, Response};
use crate::{Error, ErrorKind, Result};

const BOUNDARY: &str = "__END_OF_PART__";

/// Outcome of a single message within a batch.
#[derive(Debug)]
pub struct SendResponse {
    result: Result<String>,
}

impl SendResponse {
    /// Whether the message was accepted.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// The message id assigned by FCM, on success.
    pub fn message_id(&self) -> Option<&str> {
        self.result.as_deref().ok()
    }

    /// Why the message was rejected, on failure.
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// Consumes the response into its result.
    pub fn into_result(self) -> Result<String> {
        self.result
    }
}

impl From<Result<String>> for SendResponse {
    fn from(result: Result<String>) -> Self {
        Self { result }
    }
}

/// Per message results of a batch, in input order.
#[derive(Debug)]
pub struct BatchResponse {
    /// Number of accepted messages.
    pub success_count: usize,
    /// Number of rejected messages.
    pub failure_count: usize,
    /// One entry per input message.
    pub responses: Vec<SendResponse>,
}

impl BatchResponse {
    pub(crate) fn new(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.is_success()).count();
        Self {
            success_count,
            failure_count: responses.len() - success_count,
            responses,
        }
    }
}

impl MessagingClient {
    /// Sends up to [`MAX_BATCH_SIZE`](super::MAX_BATCH_SIZE) messages in one multipart request.
    ///
    /// Per message failures do not fail the call; they are reported in the
    /// matching entry of [`BatchResponse::responses`].
    pub async fn send_all(&self, messages: &[Message]) -> Result<BatchResponse> {
        self.send_batch(messages, false).await
    }

    /// Like [`send_all`](Self::send_all) in dry run mode.
    pub async fn send_all_dry_run(&self, messages: &[Message]) -> Result<BatchResponse> {
        self.send_batch(messages, true).await
    }

    /// Sends `message` to all of its tokens in one multipart request.
    pub async fn send_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse> {
        self.send_batch(&message.to_messages()?, false).await
    }

    /// Like [`send_multicast`](Self::send_multicast) in dry run mode.
    pub async fn send_multicast_dry_run(
        &self,
        message: &MulticastMessage,
    ) -> Result<BatchResponse> {
        self.send_batch(&message.to_messages()?, true).await
    }

    async fn send_batch(&self, messages: &[Message], dry_run: bool) -> Result<BatchResponse> {
        validate_batch(messages)?;

        let bodies = messages
            .iter()
            .map(|message| {
                serde_json::to_vec(&SendRequest {
                    message,
                    validate_only: dry_run,
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let body = encode_batch(&self.send_url, &bodies);
        debug!(count = messages.len(), bytes = body.len(), dry_run, "Sending batch");

        let req = Request::post(&self.batch_url)
            .raw(format!("multipart/mixed; boundary={BOUNDARY}"), body);
        let resp = self.fcm.send(&req).await?;

        let parts = decode_batch(&resp)?;
        if parts.len() != messages.len() {
            warn!(
                expected = messages.len(),
                received = parts.len(),
                "Batch response part count mismatch"
            );
            return Err(Error::new(
                ErrorKind::UnknownError,
                format!(
                    "expected {} responses in batch, got {}",
                    messages.len(),
                    parts.len()
                ),
            )
            .with_response(resp.to_http_response()));
        }

        Ok(BatchResponse::new(
            parts.iter().map(|part| part_result(part).into()).collect(),
        ))
    }
}

fn part_result(part: &Response) -> Result<String> {
    if part.status.is_success() {
        part.json::<SendResult>().map(|result| result.name)
    } else {
        Err(fcm_error(part))
    }
}

/// Builds a `multipart/mixed` body with one embedded `POST` per JSON body.
pub(crate) fn encode_batch(send_url: &str, bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (index, body) in bodies.iter().enumerate() {
        let mut request = format!(
            "POST {send_url} HTTP/1.1\r\n\
             Content-Length: {}\r\n\
             Content-Type: application/json; charset=UTF-8\r\n\
             \r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);

        let mut head = String::new();
        if index > 0 {
            head.push_str("\r\n");
        }
        let _ = write!(
            head,
            "--{BOUNDARY}\r\n\
             Content-Length: {}\r\n\
             Content-Type: application/http\r\n\
             Content-Id: {}\r\n\
             Content-Transfer-Encoding: binary\r\n\
             \r\n",
            request.len(),
            index + 1
        );
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(&request);
    }
    out.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    out
}

fn malformed(message: impl Into<String>, resp: &Response) -> Error {
    Error::new(ErrorKind::UnknownError, message).with_response(resp.to_http_response())
}

/// Splits a `multipart/mixed` batch response into its embedded responses.
pub(crate) fn decode_batch(resp: &Response) -> Result<Vec<Response>> {
    let content_type = resp
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let boundary = boundary(content_type).ok_or_else(|| {
        malformed(
            format!("batch response has no multipart boundary: {content_type:?}"),
            resp,
        )
    })?;
    let body = std::str::from_utf8(&resp.body)
        .map_err(|err| malformed("batch response is not valid utf-8", resp).with_source(err))?;

    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    // The first chunk is the preamble.
    for chunk in body.split(delimiter.as_str()).skip(1) {
        if chunk.starts_with("--") {
            break;
        }
        let (_, embedded) = split_head(chunk.trim_start_matches(['\r', '\n']))
            .ok_or_else(|| malformed("batch response part has no body", resp))?;
        let part = parse_http_response(embedded)
            .ok_or_else(|| malformed("malformed http response in batch part", resp))?;
        parts.push(part);
    }
    Ok(parts)
}

fn boundary(content_type: &str) -> Option<&str> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/mixed") {
        return None;
    }
    params.split(';').find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
            .filter(|value| !value.is_empty())
    })
}

/// Splits at the first empty line, accepting CRLF or bare LF line endings.
fn split_head(text: &str) -> Option<(&str, &str)> {
    match (text.find("\r\n\r\n"), text.find("\n\n")) {
        (Some(crlf), Some(lf)) if lf < crlf => Some((&text[..lf], &text[lf + 2..])),
        (Some(crlf), _) => Some((&text[..crlf], &text[crlf + 4..])),
        (None, Some(lf)) => Some((&text[..lf], &text[lf + 2..])),
        (None, None) => None,
    }
}

fn parse_http_response(text: &str) -> Option<Response> {
    let (head, body) = split_head(text).unwrap_or((text.trim_end(), ""));
    let mut lines = head.lines();

    let status_line = lines.next()?;
    let mut fields = status_line.split_whitespace();
    if !fields.next()?.starts_with("HTTP/") {
        return None;
    }
    let status = StatusCode::from_bytes(fields.next()?.as_bytes()).ok()?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim()),
        ) {
            headers.append(name, value);
        }
    }

    Some(Response {
        status,
        headers,
        body: body.trim_end_matches(['\r', '\n']).as_bytes().to_vec(),
    })
}
