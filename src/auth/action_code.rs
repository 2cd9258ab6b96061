use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::user::validate_email;
use super::AuthClient;
use crate::transport::Request;
use crate::{Error, Result};

/// Settings for email action links.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCodeSettings {
    /// Continue URL after the action completes. Its domain must be authorized.
    pub url: String,
    /// Open the link in the mobile app instead of a browser.
    pub handle_code_in_app: bool,
    /// iOS bundle id of the app that should handle the link.
    pub ios_bundle_id: Option<String>,
    /// Android package name of the app that should handle the link.
    pub android_package_name: Option<String>,
    /// Minimum Android app version that can handle the link.
    pub android_minimum_version: Option<String>,
    /// Install the Android app if it is not installed yet.
    pub android_install_app: bool,
    /// Dynamic link domain to use instead of the project default.
    pub dynamic_link_domain: Option<String>,
}

impl ActionCodeSettings {
    fn to_request(&self, req: &mut Map<String, Value>) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::invalid_argument("url must not be empty"));
        }
        url::Url::parse(&self.url).map_err(|err| {
            Error::invalid_argument(format!("malformed url string: {:?}", self.url))
                .with_source(err)
        })?;
        req.insert("continueUrl".into(), json!(self.url));
        req.insert("canHandleCodeInApp".into(), json!(self.handle_code_in_app));

        if let Some(domain) = &self.dynamic_link_domain {
            req.insert("dynamicLinkDomain".into(), json!(domain));
        }
        if let Some(bundle) = &self.ios_bundle_id {
            req.insert("iOSBundleId".into(), json!(bundle));
        }
        match &self.android_package_name {
            Some(package) => {
                req.insert("androidPackageName".into(), json!(package));
                if let Some(version) = &self.android_minimum_version {
                    req.insert("androidMinimumVersion".into(), json!(version));
                }
                if self.android_install_app {
                    req.insert("androidInstallApp".into(), json!(true));
                }
            }
            None if self.android_minimum_version.is_some() || self.android_install_app => {
                return Err(Error::invalid_argument(
                    "android package name is required when specifying other android settings",
                ));
            }
            None => {}
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkType {
    EmailVerification,
    PasswordReset,
    EmailSignIn,
}

impl LinkType {
    fn request_type(self) -> &'static str {
        match self {
            Self::EmailVerification => "VERIFY_EMAIL",
            Self::PasswordReset => "PASSWORD_RESET",
            Self::EmailSignIn => "EMAIL_SIGNIN",
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OobResponse {
    oob_link: String,
}

impl AuthClient {
    async fn generate_link(
        &self,
        link: LinkType,
        email: &str,
        settings: Option<&ActionCodeSettings>,
    ) -> Result<String> {
        validate_email(email)?;

        let mut req = Map::new();
        req.insert("requestType".into(), json!(link.request_type()));
        req.insert("email".into(), json!(email));
        req.insert("returnOobLink".into(), json!(true));
        if let Some(settings) = settings {
            settings.to_request(&mut req)?;
        }

        let req = Request::post(self.project_url("/accounts:sendOobCode")).json(req)?;
        let resp: OobResponse = self.http().send_json(&req).await?;
        Ok(resp.oob_link)
    }

    /// Generates an email verification link for `email`.
    pub async fn email_verification_link(
        &self,
        email: &str,
        settings: Option<&ActionCodeSettings>,
    ) -> Result<String> {
        self.generate_link(LinkType::EmailVerification, email, settings)
            .await
    }

    /// Generates a password reset link for `email`.
    pub async fn password_reset_link(
        &self,
        email: &str,
        settings: Option<&ActionCodeSettings>,
    ) -> Result<String> {
        self.generate_link(LinkType::PasswordReset, email, settings)
            .await
    }

    /// Generates a sign-in with email link. The link must be handled in app.
    pub async fn email_sign_in_link(
        &self,
        email: &str,
        settings: &ActionCodeSettings,
    ) -> Result<String> {
        if !settings.handle_code_in_app {
            return Err(Error::invalid_argument(
                "handle_code_in_app must be true when generating email sign-in links",
            ));
        }
        self.generate_link(LinkType::EmailSignIn, email, Some(settings))
            .await
    }
}
