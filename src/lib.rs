//! # firebase-admin
//!
//! Server side Firebase Admin SDK. It mints custom tokens, verifies ID tokens
//! and session cookies against Google's rotating public keys, manages user
//! accounts, and sends Cloud Messaging notifications one by one, in
//! multipart batches, or to topics.
//!
//! ## Example
//!
//! ```no_run
//! use firebase_admin::messaging::{Message, Notification};
//! use firebase_admin::{App, Config, Credential};
//!
//! # async fn run() -> firebase_admin::Result<()> {
//! let credential = Credential::from_file("service-account.json")?;
//! let app = App::new(Config::default(), credential)?;
//!
//! // Verify a token sent by a client app.
//! let auth = app.auth()?;
//! let token = auth.verify_id_token_and_check_revoked("<id token>").await?;
//!
//! // Notify the user's devices.
//! let mut message = Message::for_topic(format!("user-{}", token.uid));
//! message.notification = Some(Notification {
//!     title: Some("Welcome back".into()),
//!     ..Notification::default()
//! });
//! let id = app.messaging()?.send(&message).await?;
//! println!("sent {id}");
//! # Ok(())
//! # }
//! ```
//!
//! With the `actix` feature, a verified [`auth::Token`] can be extracted
//! directly in handlers once an [`auth::AuthClient`] is registered as app data.

pub mod auth;
mod config;
pub mod credential;
mod error;
#[cfg(feature = "actix")]
mod impls;
pub mod messaging;
#[cfg(test)]
mod test_support;
mod transport;

use std::sync::Arc;

use tracing::debug;

pub use config::{Config, FIREBASE_CONFIG_ENV};
pub use credential::Credential;
pub use error::*;

use credential::TokenSource;
use transport::HttpClient;

/// Version of this SDK, reported in request headers.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

struct AppInner {
    config: Config,
    credential: Credential,
    project_id: Option<String>,
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

/// Root handle of the SDK.
///
/// Holds the configuration and credential and hands out service clients that
/// share one connection pool and one access token cache. Cloning is cheap.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    /// Creates an app from an explicit configuration and credential.
    pub fn new(config: Config, credential: Credential) -> Result<App> {
        let http = reqwest::Client::builder().build().map_err(|err| {
            Error::new(ErrorKind::Unknown, format!("failed to build http client: {err}"))
                .with_source(err)
        })?;

        let project_id = config
            .project_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| credential.project_id().map(str::to_owned))
            .or_else(config::project_id_from_env);
        debug!(project_id = ?project_id, "Initializing Firebase app");

        let tokens = credential.token_source(http.clone());
        Ok(App {
            inner: Arc::new(AppInner {
                config,
                credential,
                project_id,
                http,
                tokens,
            }),
        })
    }

    /// Creates an app from `FIREBASE_CONFIG` and `GOOGLE_APPLICATION_CREDENTIALS`.
    pub fn from_env() -> Result<App> {
        Self::new(Config::from_env()?, Credential::from_env()?)
    }

    /// The resolved project id: from the config, the service account key, or
    /// the environment, in that order.
    pub fn project_id(&self) -> Option<&str> {
        self.inner.project_id.as_deref()
    }

    /// The configuration this app was created with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The credential this app was created with.
    pub fn credential(&self) -> &Credential {
        &self.inner.credential
    }

    pub(crate) fn reqwest(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// An authenticated transport sharing this app's pool and token cache.
    pub(crate) fn http_client(&self) -> HttpClient {
        HttpClient::new(self.inner.http.clone(), Some(Arc::clone(&self.inner.tokens)))
    }

    /// A client for Firebase Authentication.
    ///
    /// Fails with `invalid-argument` when no project id can be resolved.
    pub fn auth(&self) -> Result<auth::AuthClient> {
        auth::AuthClient::new(self)
    }

    /// A client for Firebase Cloud Messaging.
    ///
    /// Fails with `invalid-argument` when no project id can be resolved.
    pub fn messaging(&self) -> Result<messaging::MessagingClient> {
        messaging::MessagingClient::new(self)
    }
}
