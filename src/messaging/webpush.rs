//! Web push options.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::{is_false, validate_image_url};
use crate::{Error, Result};

/// Keys produced by the typed fields of [`WebpushNotification`].
const STANDARD_NOTIFICATION_KEYS: &[&str] = &[
    "actions",
    "title",
    "body",
    "icon",
    "badge",
    "dir",
    "data",
    "image",
    "lang",
    "renotify",
    "requireInteraction",
    "silent",
    "tag",
    "timestamp",
    "vibrate",
];

/// Options for messages delivered to web apps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WebpushConfig {
    /// Web push protocol headers, e.g. `TTL`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Overrides [`Message::data`](super::Message::data) for web push.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    /// Web notification to display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<WebpushNotification>,
    /// Web push specific FCM options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<WebpushFcmOptions>,
}

impl WebpushConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(notification) = &self.notification {
            notification.validate()?;
        }
        if let Some(link) = self.fcm_options.as_ref().and_then(|o| o.link.as_deref()) {
            let parsed = url::Url::parse(link).map_err(|err| {
                Error::invalid_argument(format!("malformed link url: {err}")).with_source(err)
            })?;
            if parsed.scheme() != "https" {
                return Err(Error::invalid_argument("link must be an https url"));
            }
        }
        Ok(())
    }
}

/// Text direction of a web notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Left to right.
    Ltr,
    /// Right to left.
    Rtl,
    /// Decided by the browser.
    Auto,
}

/// An action button of a web notification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebpushNotificationAction {
    /// Identifier reported back when the user clicks the action.
    pub action: String,
    /// Button label.
    pub title: String,
    /// Button icon URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Web notification, following the Web Notification API options.
///
/// `custom_data` is merged into the same JSON object as the typed fields and
/// must not reuse their keys.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebpushNotification {
    /// Buttons shown with the notification.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<WebpushNotificationAction>,
    /// Notification title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// URL of the notification icon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// URL of the monochrome badge image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Text direction.
    #[serde(rename = "dir", skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Arbitrary data delivered with the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// URL of an image shown in the notification.
    #[serde(rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// BCP 47 language tag of the title and body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Alert again when replacing a notification with the same tag.
    #[serde(default, skip_serializing_if = "is_false")]
    pub renotify: bool,
    /// Keep the notification until the user dismisses it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub require_interaction: bool,
    /// Suppress sound and vibration.
    #[serde(default, skip_serializing_if = "is_false")]
    pub silent: bool,
    /// Notifications with the same tag replace each other.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Milliseconds since the epoch.
    #[serde(rename = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp_millis: Option<i64>,
    /// Vibration pattern in milliseconds.
    #[serde(rename = "vibrate", default, skip_serializing_if = "Vec::is_empty")]
    pub vibrate_pattern: Vec<u32>,
    /// Extra notification options merged into the payload.
    #[serde(flatten)]
    pub custom_data: Map<String, Value>,
}

impl WebpushNotification {
    fn validate(&self) -> Result<()> {
        if let Some(key) = self
            .custom_data
            .keys()
            .find(|key| STANDARD_NOTIFICATION_KEYS.contains(&key.as_str()))
        {
            return Err(Error::invalid_argument(format!(
                "multiple specifications for the key {key:?}"
            )));
        }
        if let Some(image) = &self.image_url {
            validate_image_url(image)?;
        }
        Ok(())
    }
}

/// Web push specific FCM options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebpushFcmOptions {
    /// Page opened when the user clicks the notification. Must use `https`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}
