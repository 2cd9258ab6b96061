use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use super::android::AndroidConfig;
use super::apns::ApnsConfig;
use super::webpush::WebpushConfig;
use crate::{Error, Result};

/// Maximum number of messages or tokens in a single batch.
pub const MAX_BATCH_SIZE: usize = 500;

const TOPIC_PREFIX: &str = "/topics/";

static TOPIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(/topics/)?(private/)?[A-Za-z0-9\-_.~%]+$").unwrap());

static ANALYTICS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_.~%]{1,50}$").unwrap());

/// Recipient of a [`Message`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// A single device registration token.
    Token(String),
    /// A topic name, with or without the `/topics/` prefix.
    Topic(String),
    /// A boolean condition over topics, e.g. `'a' in topics && 'b' in topics`.
    Condition(String),
}

// Topics go on the wire without their `/topics/` prefix.
impl Serialize for Target {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Target::Token(token) => map.serialize_entry("token", token)?,
            Target::Topic(topic) => {
                map.serialize_entry("topic", topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic))?;
            }
            Target::Condition(condition) => map.serialize_entry("condition", condition)?,
        }
        map.end()
    }
}

/// Notification shown on every platform unless a platform config overrides it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification body text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Image shown in the notification. Must be an absolute URL.
    #[serde(rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Platform independent FCM options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FcmOptions {
    /// Label attached to the message's analytics data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_label: Option<String>,
}

/// A message sent through Firebase Cloud Messaging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who receives the message.
    #[serde(flatten)]
    pub target: Target,
    /// Arbitrary key/value payload delivered to the app.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    /// Cross platform notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    /// Android specific options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android: Option<AndroidConfig>,
    /// Web push specific options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebpushConfig>,
    /// APNs specific options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apns: Option<ApnsConfig>,
    /// Platform independent FCM options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<FcmOptions>,
}

impl Message {
    /// An empty message for `target`.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            data: HashMap::new(),
            notification: None,
            android: None,
            webpush: None,
            apns: None,
            fcm_options: None,
        }
    }

    /// An empty message for a device registration token.
    pub fn for_token(token: impl Into<String>) -> Self {
        Self::new(Target::Token(token.into()))
    }

    /// An empty message for a topic.
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self::new(Target::Topic(topic.into()))
    }

    /// An empty message for a topic condition.
    pub fn for_condition(condition: impl Into<String>) -> Self {
        Self::new(Target::Condition(condition.into()))
    }

    /// Checks the message before it is sent.
    pub fn validate(&self) -> Result<()> {
        match &self.target {
            Target::Token(value) | Target::Condition(value) if value.is_empty() => {
                return Err(Error::invalid_argument(
                    "exactly one of token, topic or condition must be specified",
                ));
            }
            Target::Topic(topic) => validate_topic(topic)?,
            _ => {}
        }
        if let Some(notification) = &self.notification {
            if let Some(image) = &notification.image_url {
                validate_image_url(image)?;
            }
        }
        if let Some(android) = &self.android {
            android.validate()?;
        }
        if let Some(webpush) = &self.webpush {
            webpush.validate()?;
        }
        if let Some(apns) = &self.apns {
            apns.validate()?;
        }
        if let Some(options) = &self.fcm_options {
            validate_analytics_label(options.analytics_label.as_deref())?;
        }
        Ok(())
    }
}

/// One payload sent to many registration tokens.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MulticastMessage {
    /// Registration tokens, at most [`MAX_BATCH_SIZE`].
    pub tokens: Vec<String>,
    /// Arbitrary key/value payload delivered to the app.
    pub data: HashMap<String, String>,
    /// Cross platform notification.
    pub notification: Option<Notification>,
    /// Android specific options.
    pub android: Option<AndroidConfig>,
    /// Web push specific options.
    pub webpush: Option<WebpushConfig>,
    /// APNs specific options.
    pub apns: Option<ApnsConfig>,
    /// Platform independent FCM options.
    pub fcm_options: Option<FcmOptions>,
}

impl MulticastMessage {
    pub(crate) fn to_messages(&self) -> Result<Vec<Message>> {
        if self.tokens.is_empty() {
            return Err(Error::invalid_argument("tokens must not be empty"));
        }
        if self.tokens.len() > MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "tokens must not contain more than {MAX_BATCH_SIZE} elements"
            )));
        }
        Ok(self
            .tokens
            .iter()
            .map(|token| Message {
                target: Target::Token(token.clone()),
                data: self.data.clone(),
                notification: self.notification.clone(),
                android: self.android.clone(),
                webpush: self.webpush.clone(),
                apns: self.apns.clone(),
                fcm_options: self.fcm_options.clone(),
            })
            .collect())
    }
}

pub(crate) fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::invalid_argument("topic name must not be empty"));
    }
    if TOPIC.is_match(topic) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "malformed topic name: {topic:?}"
        )))
    }
}

pub(crate) fn validate_image_url(image_url: &str) -> Result<()> {
    url::Url::parse(image_url).map_err(|err| {
        Error::invalid_argument(format!("invalid image url: {image_url:?}")).with_source(err)
    })?;
    Ok(())
}

pub(crate) fn validate_analytics_label(label: Option<&str>) -> Result<()> {
    match label {
        Some(label) if !ANALYTICS_LABEL.is_match(label) => Err(Error::invalid_argument(
            "analytics label must have 1-50 characters from [a-zA-Z0-9-_.~%]",
        )),
        _ => Ok(()),
    }
}

#[expect(clippy::trivially_copy_pass_by_ref)]
pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
