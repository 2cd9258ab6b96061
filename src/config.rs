use std::env;
use std::fs;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Environment variable holding the default app configuration, either inline
/// JSON or the path to a JSON file.
pub const FIREBASE_CONFIG_ENV: &str = "FIREBASE_CONFIG";

pub(crate) const PROJECT_ID_ENV_VARS: [&str; 2] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT"];

/// Options used to initialize an [`App`](crate::App).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Google Cloud project id. Falls back to the credential and then to the
    /// `GOOGLE_CLOUD_PROJECT` / `GCLOUD_PROJECT` environment variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Service account email used for remote IAM signing of custom tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,

    /// Realtime Database URL. Not used by auth or messaging.
    #[serde(default, rename = "databaseURL", skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// Cloud Storage bucket name. Not used by auth or messaging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,

    /// Auth variable override for database access. Not used by auth or messaging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_override: Option<Map<String, Value>>,
}

impl Config {
    /// Loads the configuration from the `FIREBASE_CONFIG` environment variable.
    ///
    /// Values starting with `{` are parsed as inline JSON; anything else is
    /// treated as a file path. An unset or empty variable yields the default.
    pub fn from_env() -> Result<Config> {
        match env::var(FIREBASE_CONFIG_ENV) {
            Ok(value) if !value.trim().is_empty() => Self::parse(&value),
            _ => Ok(Config::default()),
        }
    }

    fn parse(value: &str) -> Result<Config> {
        let value = value.trim();
        let json = if value.starts_with('{') {
            value.to_owned()
        } else {
            fs::read_to_string(value).map_err(|err| {
                Error::invalid_argument(format!("failed to read config file {value:?}: {err}"))
                    .with_source(err)
            })?
        };

        serde_json::from_str(&json).map_err(|err| {
            Error::invalid_argument(format!("invalid app configuration: {err}")).with_source(err)
        })
    }

    /// Sets the project id.
    #[must_use]
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the service account email used for IAM signing.
    #[must_use]
    pub fn with_service_account_id(mut self, service_account_id: impl Into<String>) -> Self {
        self.service_account_id = Some(service_account_id.into());
        self
    }
}

/// Returns the first non-empty project id found in the environment.
pub(crate) fn project_id_from_env() -> Option<String> {
    PROJECT_ID_ENV_VARS
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_json() {
        let config = Config::parse(
            r#"{"projectId": "mock-project", "databaseURL": "https://db.example.com", "storageBucket": "bucket"}"#,
        )
        .unwrap();

        assert_eq!(config.project_id.as_deref(), Some("mock-project"));
        assert_eq!(config.database_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.storage_bucket.as_deref(), Some("bucket"));
        assert!(config.service_account_id.is_none());
    }

    #[test]
    fn parses_config_file() {
        let dir = std::env::temp_dir().join("firebase_admin_config_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(&path, r#"{"projectId": "file-project", "serviceAccountId": "sa@example.com"}"#)
            .unwrap();

        let config = Config::parse(path.to_str().unwrap()).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("file-project"));
        assert_eq!(config.service_account_id.as_deref(), Some("sa@example.com"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = Config::parse("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn rejects_missing_file() {
        let err = Config::parse("/definitely/not/here.json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }
}
