//! Apple Push Notification service options.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::message::{is_false, validate_analytics_label, validate_image_url};
use crate::{Error, Result};

/// Keys of the `aps` dictionary that custom data may not override.
const RESERVED_APS_KEYS: &[&str] = &[
    "alert",
    "badge",
    "sound",
    "content-available",
    "mutable-content",
    "category",
    "thread-id",
];

/// Options for messages delivered through APNs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApnsConfig {
    /// APNs request headers, e.g. `apns-priority`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// The APNs payload, including the `aps` dictionary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ApnsPayload>,
    /// APNs specific FCM options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<ApnsFcmOptions>,
}

impl ApnsConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(payload) = &self.payload {
            payload.validate()?;
        }
        if let Some(options) = &self.fcm_options {
            validate_analytics_label(options.analytics_label.as_deref())?;
            if let Some(image) = &options.image_url {
                validate_image_url(image)?;
            }
        }
        Ok(())
    }
}

/// Body of an APNs message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApnsPayload {
    /// The `aps` dictionary.
    pub aps: Aps,
    /// Additional top level keys, next to `aps`.
    #[serde(flatten)]
    pub custom_data: Map<String, Value>,
}

impl ApnsPayload {
    fn validate(&self) -> Result<()> {
        if self.custom_data.contains_key("aps") {
            return Err(Error::invalid_argument(
                "custom data must not contain the aps key",
            ));
        }
        self.aps.validate()
    }
}

/// The `aps` dictionary of an APNs payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aps {
    /// Alert to display, either plain text or a structured alert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    /// Badge shown on the app icon. `Some(0)` removes the badge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    /// Sound to play, either a sound name or a critical alert sound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<Sound>,
    /// Wake the app for a background update.
    #[serde(
        rename = "content-available",
        default,
        skip_serializing_if = "is_false",
        with = "int_flag"
    )]
    pub content_available: bool,
    /// Let a notification service extension modify the content.
    #[serde(
        rename = "mutable-content",
        default,
        skip_serializing_if = "is_false",
        with = "int_flag"
    )]
    pub mutable_content: bool,
    /// Notification category for actionable notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Groups related notifications.
    #[serde(rename = "thread-id", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Extra keys merged into the `aps` dictionary.
    #[serde(flatten)]
    pub custom_data: Map<String, Value>,
}

impl Aps {
    fn validate(&self) -> Result<()> {
        if let Some(key) = self
            .custom_data
            .keys()
            .find(|key| RESERVED_APS_KEYS.contains(&key.as_str()))
        {
            return Err(Error::invalid_argument(format!(
                "multiple specifications for the key {key:?}"
            )));
        }
        if let Some(Alert::Rich(alert)) = &self.alert {
            alert.validate()?;
        }
        if let Some(Sound::Critical(sound)) = &self.sound {
            sound.validate()?;
        }
        Ok(())
    }
}

/// An APNs alert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    /// Plain alert text.
    Text(String),
    /// Structured alert with localization support.
    Rich(ApsAlert),
}

/// Structured APNs alert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApsAlert {
    /// Short title, shown on Apple Watch and in the notification center.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Secondary line below the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Alert text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Localizable string key for the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,
    /// Format arguments for `loc_key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loc_args: Vec<String>,
    /// Localizable string key for the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_loc_key: Option<String>,
    /// Format arguments for `title_loc_key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub title_loc_args: Vec<String>,
    /// Localizable string key for the subtitle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_loc_key: Option<String>,
    /// Format arguments for `subtitle_loc_key`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitle_loc_args: Vec<String>,
    /// Localizable string key for the action button title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_loc_key: Option<String>,
    /// Launch image shown when the app opens from the alert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_image: Option<String>,
}

impl ApsAlert {
    fn validate(&self) -> Result<()> {
        let pairs = [
            (&self.loc_args, &self.loc_key, "loc_key", "loc_args"),
            (
                &self.title_loc_args,
                &self.title_loc_key,
                "title_loc_key",
                "title_loc_args",
            ),
            (
                &self.subtitle_loc_args,
                &self.subtitle_loc_key,
                "subtitle_loc_key",
                "subtitle_loc_args",
            ),
        ];
        for (args, key, key_name, args_name) in pairs {
            if !args.is_empty() && key.is_none() {
                return Err(Error::invalid_argument(format!(
                    "{key_name} is required when specifying {args_name}"
                )));
            }
        }
        Ok(())
    }
}

/// An APNs sound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sound {
    /// Name of a sound file in the app bundle, or `default`.
    Name(String),
    /// A critical alert sound.
    Critical(CriticalSound),
}

/// Sound settings for critical alerts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CriticalSound {
    /// Marks the sound as critical.
    #[serde(default, skip_serializing_if = "is_false", with = "int_flag")]
    pub critical: bool,
    /// Name of a sound file in the app bundle, or `default`.
    pub name: String,
    /// Volume between 0.0 (silent) and 1.0 (full volume).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl CriticalSound {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_argument("sound name must not be empty"));
        }
        if let Some(volume) = self.volume {
            if !(0.0..=1.0).contains(&volume) {
                return Err(Error::invalid_argument(
                    "critical sound volume must be in the interval [0, 1]",
                ));
            }
        }
        Ok(())
    }
}

/// APNs specific FCM options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApnsFcmOptions {
    /// Label attached to the message's analytics data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics_label: Option<String>,
    /// Image shown in the notification. Must be an absolute URL.
    #[serde(rename = "image", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// APNs booleans are the integer `1` when set and absent otherwise.
mod int_flag {
    use super::*;

    #[expect(clippy::trivially_copy_pass_by_ref)]
    pub(super) fn serialize<S: Serializer>(
        value: &bool,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<bool, D::Error> {
        Ok(u64::deserialize(deserializer)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_aps_with_flags_and_custom_data() {
        let mut custom = Map::new();
        custom.insert("k1".into(), json!("v1"));
        let aps = Aps {
            alert: Some(Alert::Text("hello".into())),
            badge: Some(0),
            sound: Some(Sound::Name("default".into())),
            content_available: true,
            mutable_content: false,
            thread_id: Some("thread".into()),
            custom_data: custom,
            ..Aps::default()
        };
        aps.validate().unwrap();

        let value = serde_json::to_value(&aps).unwrap();
        assert_eq!(
            value,
            json!({
                "alert": "hello",
                "badge": 0,
                "sound": "default",
                "content-available": 1,
                "thread-id": "thread",
                "k1": "v1",
            })
        );
        let decoded: Aps = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, aps);
    }

    #[test]
    fn serializes_structured_alert_and_critical_sound() {
        let payload = ApnsPayload {
            aps: Aps {
                alert: Some(Alert::Rich(ApsAlert {
                    title: Some("t".into()),
                    loc_key: Some("key".into()),
                    loc_args: vec!["a".into(), "b".into()],
                    launch_image: Some("image.png".into()),
                    ..ApsAlert::default()
                })),
                sound: Some(Sound::Critical(CriticalSound {
                    critical: true,
                    name: "alarm".into(),
                    volume: Some(0.5),
                })),
                mutable_content: true,
                ..Aps::default()
            },
            custom_data: Map::from_iter([("extra".to_owned(), json!({"nested": true}))]),
        };
        payload.validate().unwrap();

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "aps": {
                    "alert": {
                        "title": "t",
                        "loc-key": "key",
                        "loc-args": ["a", "b"],
                        "launch-image": "image.png",
                    },
                    "sound": {"critical": 1, "name": "alarm", "volume": 0.5},
                    "mutable-content": 1,
                },
                "extra": {"nested": true},
            })
        );
        let decoded: ApnsPayload = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_invalid_payloads() {
        let reserved = Aps {
            custom_data: Map::from_iter([("badge".to_owned(), json!(1))]),
            ..Aps::default()
        };
        assert!(reserved.validate().is_err());

        let loud = Aps {
            sound: Some(Sound::Critical(CriticalSound {
                critical: true,
                name: "alarm".into(),
                volume: Some(1.5),
            })),
            ..Aps::default()
        };
        assert!(loud.validate().is_err());

        let unnamed = Aps {
            sound: Some(Sound::Critical(CriticalSound::default())),
            ..Aps::default()
        };
        assert!(unnamed.validate().is_err());

        let orphan_args = Aps {
            alert: Some(Alert::Rich(ApsAlert {
                subtitle_loc_args: vec!["a".into()],
                ..ApsAlert::default()
            })),
            ..Aps::default()
        };
        assert!(orphan_args.validate().is_err());

        let shadowed = ApnsPayload {
            custom_data: Map::from_iter([("aps".to_owned(), json!({}))]),
            ..ApnsPayload::default()
        };
        assert!(shadowed.validate().is_err());

        let image = ApnsConfig {
            fcm_options: Some(ApnsFcmOptions {
                image_url: Some("not a url".into()),
                ..ApnsFcmOptions::default()
            }),
            ..ApnsConfig::default()
        };
        assert!(image.validate().is_err());
    }
}
