//! Android specific message options.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::message::{is_false, validate_analytics_label, validate_image_url};
use crate::{Error, Result};

static COLOR: LazyLock<Regex> = LazyLock::new(|| Regex::new("^#[0-9a-fA-F]{6}$").unwrap());

static COLOR_WITH_ALPHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^#[0-9a-fA-F]{6}([0-9a-fA-F]{2})?$").unwrap());

/// Delivery priority of an Android message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AndroidPriority {
    /// Default priority for data messages.
    Normal,
    /// Wakes a sleeping device and opens a network connection.
    High,
}

/// Relative priority of an Android notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationPriority {
    /// Lowest priority.
    #[serde(rename = "PRIORITY_MIN")]
    Min,
    /// Lower than default.
    #[serde(rename = "PRIORITY_LOW")]
    Low,
    /// Default priority.
    #[serde(rename = "PRIORITY_DEFAULT")]
    Default,
    /// Higher than default.
    #[serde(rename = "PRIORITY_HIGH")]
    High,
    /// Highest priority.
    #[serde(rename = "PRIORITY_MAX")]
    Max,
}

/// Lock screen visibility of an Android notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    /// Shown on all lock screens, with sensitive content hidden on secure ones.
    Private,
    /// Shown in full on all lock screens.
    Public,
    /// Not shown on secure lock screens.
    Secret,
}

/// Options for messages delivered to Android apps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AndroidConfig {
    /// Groups messages that can be collapsed so only the last one is shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collapse_key: Option<String>,
    /// Delivery priority, `normal` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<AndroidPriority>,
    /// How long the message is kept in storage while the device is offline.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_duration"
    )]
    pub ttl: Option<Duration>,
    /// Package name the registration tokens must match to receive the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_package_name: Option<String>,
    /// Overrides [`Message::data`](super::Message::data) for Android.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    /// Android notification to display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<AndroidNotification>,
    /// Android specific FCM options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<AndroidFcmOptions>,
    /// Deliver the message while the device is in direct boot mode.
    #[serde(default, skip_serializing_if = "is_false")]
    pub direct_boot_ok: bool,
}

impl AndroidConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(notification) = &self.notification {
            notification.validate()?;
        }
        if let Some(options) = &self.fcm_options {
            validate_analytics_label(options.analytics_label.as_deref())?;
        }
        Ok(())
    }
}

/// Notification shown on Android devices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AndroidNotification {
    /// Notification title; overrides the generic notification title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Notification body; overrides the generic notification body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Drawable resource name of the notification icon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Icon color in `#RRGGBB` format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Sound file name in the app's `res/raw` directory, or `default`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Notifications with the same tag replace each other in the drawer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Intent action launched when the user clicks the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_action: Option<String>,
    /// String resource key used to localize the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_loc_key: Option<String>,
    /// Format arguments for `body_loc_key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_loc_args: Vec<String>,
    /// String resource key used to localize the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    /// Format arguments for `title_loc_key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_loc_args: Vec<String>,
    /// Notification channel (Android O and later).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Image shown in the notification.
    #[serde(rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Text announced by accessibility services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    /// Keep the notification when the user clicks it.
    #[serde(default, skip_serializing_if = "is_false")]
    pub sticky: bool,
    /// When the event behind the notification happened.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_event_time"
    )]
    pub event_time: Option<DateTime<Utc>>,
    /// Do not bridge the notification to wearables.
    #[serde(default, skip_serializing_if = "is_false")]
    pub local_only: bool,
    /// Relative priority within the notification drawer.
    #[serde(rename = "notification_priority", skip_serializing_if = "Option::is_none")]
    pub priority: Option<NotificationPriority>,
    /// Use the platform default sound.
    #[serde(default, skip_serializing_if = "is_false")]
    pub default_sound: bool,
    /// Use the platform default vibration pattern.
    #[serde(default, skip_serializing_if = "is_false")]
    pub default_vibrate_timings: bool,
    /// Use the platform default LED settings.
    #[serde(default, skip_serializing_if = "is_false")]
    pub default_light_settings: bool,
    /// Alternating off and on vibration durations.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "duration_list")]
    pub vibrate_timings: Vec<Duration>,
    /// Lock screen visibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Number shown on the app icon badge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u32>,
    /// LED color and blink pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_settings: Option<LightSettings>,
}

impl AndroidNotification {
    fn validate(&self) -> Result<()> {
        if let Some(color) = &self.color {
            if !COLOR.is_match(color) {
                return Err(Error::invalid_argument(
                    "color must be in the #RRGGBB form",
                ));
            }
        }
        if !self.title_loc_args.is_empty() && self.title_loc_key.is_none() {
            return Err(Error::invalid_argument(
                "title_loc_key is required when specifying title_loc_args",
            ));
        }
        if !self.body_loc_args.is_empty() && self.body_loc_key.is_none() {
            return Err(Error::invalid_argument(
                "body_loc_key is required when specifying body_loc_args",
            ));
        }
        if let Some(image) = &self.image_url {
            validate_image_url(image)?;
        }
        if let Some(light) = &self.light_settings {
            light.validate()?;
        }
        Ok(())
    }
}

/// LED settings of an Android notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightSettings {
    /// LED color in `#RRGGBB` or `#RRGGBBAA` format.
    pub color: String,
    /// How long the LED stays on while blinking.
    pub light_on_duration: Duration,
    /// How long the LED stays off while blinking.
    pub light_off_duration: Duration,
}

impl LightSettings {
    fn validate(&self) -> Result<()> {
        if COLOR_WITH_ALPHA.is_match(&self.color) {
            Ok(())
        } else {
            Err(Error::invalid_argument(
                "light_settings.color must be in the form #RRGGBB or #RRGGBBAA",
            ))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Rgba {
    red: f64,
    green: f64,
    blue: f64,
    alpha: f64,
}

impl Rgba {
    fn from_hex(color: &str) -> Option<Self> {
        if !COLOR_WITH_ALPHA.is_match(color) {
            return None;
        }
        let channel = |at: usize| {
            color
                .get(at..at + 2)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .map(|value| f64::from(value) / 255.0)
        };
        Some(Self {
            red: channel(1)?,
            green: channel(3)?,
            blue: channel(5)?,
            alpha: if color.len() == 9 { channel(7)? } else { 1.0 },
        })
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn to_hex(&self) -> String {
        let byte = |value: f64| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        let rgb = format!(
            "#{:02X}{:02X}{:02X}",
            byte(self.red),
            byte(self.green),
            byte(self.blue)
        );
        if byte(self.alpha) == u8::MAX {
            rgb
        } else {
            format!("{rgb}{:02X}", byte(self.alpha))
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LightSettingsWire {
    color: Rgba,
    #[serde(with = "duration")]
    light_on_duration: Duration,
    #[serde(with = "duration")]
    light_off_duration: Duration,
}

impl Serialize for LightSettings {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let color = Rgba::from_hex(&self.color).ok_or_else(|| {
            S::Error::custom(format!("invalid light settings color: {:?}", self.color))
        })?;
        LightSettingsWire {
            color,
            light_on_duration: self.light_on_duration,
            light_off_duration: self.light_off_duration,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LightSettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = LightSettingsWire::deserialize(deserializer)?;
        Ok(Self {
            color: wire.color.to_hex(),
            light_on_duration: wire.light_on_duration,
            light_off_duration: wire.light_off_duration,
        })
    }
}

/// Android specific FCM options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidFcmOptions {
    /// Label attached to the message's analytics data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_label: Option<String>,
}

/// Formats a duration as protobuf JSON: `3s`, or `3.000000001s` when it has
/// a fractional part.
pub(crate) fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match duration.subsec_nanos() {
        0 => format!("{secs}s"),
        nanos => format!("{secs}.{nanos:09}s"),
    }
}

pub(crate) fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.strip_suffix('s')?;
    let (secs, frac) = value.split_once('.').unwrap_or((value, ""));
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs = secs.parse::<u64>().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse::<u32>().ok()?
    };
    Some(Duration::new(secs, nanos))
}

fn serialize_event_time<S: Serializer>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(time) => {
            serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Nanos, true))
        }
        None => serializer.serialize_none(),
    }
}

mod duration {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_duration(&value)
            .ok_or_else(|| D::Error::custom(format!("invalid duration: {value:?}")))
    }
}

mod optional_duration {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_str(&format_duration(*value)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|value| {
                parse_duration(&value)
                    .ok_or_else(|| D::Error::custom(format!("invalid duration: {value:?}")))
            })
            .transpose()
    }
}

mod duration_list {
    use super::*;

    pub(super) fn serialize<S: Serializer>(
        value: &[Duration],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(value.iter().map(|d| format_duration(*d)))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<Duration>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|value| {
                parse_duration(value)
                    .ok_or_else(|| D::Error::custom(format!("invalid duration: {value:?}")))
            })
            .collect()
    }
}
