//! Shared fixtures for unit tests.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use serde_json::{Map, Value};

use crate::credential::{ServiceAccountKey, StaticTokenSource};
use crate::transport::{HttpClient, RetryConfig};

pub(crate) const PROJECT_ID: &str = "mock-project-id";
pub(crate) const CLIENT_EMAIL: &str = "mock-email@mock-project.iam.gserviceaccount.com";

pub(crate) struct TestKey {
    pub(crate) private_pem: String,
    pub(crate) public_pem: Vec<u8>,
    /// Self-signed X.509 certificate wrapping the public key.
    pub(crate) certificate_pem: String,
}

fn generate_key() -> TestKey {
    let rsa = Rsa::generate(2048).expect("Failed to generate RSA key");
    let pkey = PKey::from_rsa(rsa.clone()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "securetoken.system.gserviceaccount.com")
        .unwrap();
    let name = name.build();

    let mut cert = X509Builder::new().unwrap();
    cert.set_version(2).unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&pkey).unwrap();
    cert.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    cert.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    cert.sign(&pkey, MessageDigest::sha256()).unwrap();

    TestKey {
        private_pem: String::from_utf8(rsa.private_key_to_pem().unwrap()).unwrap(),
        public_pem: rsa.public_key_to_pem().unwrap(),
        certificate_pem: String::from_utf8(cert.build().to_pem().unwrap()).unwrap(),
    }
}

// RSA key generation is slow; every test shares one key pair.
static TEST_KEY: LazyLock<TestKey> = LazyLock::new(generate_key);

// A second, unrelated key pair for signature mismatch tests.
static OTHER_KEY: LazyLock<TestKey> = LazyLock::new(generate_key);

pub(crate) fn test_key() -> &'static TestKey {
    &TEST_KEY
}

pub(crate) fn other_key() -> &'static TestKey {
    &OTHER_KEY
}

/// Body of a public key endpoint serving the shared test key under `kid`.
pub(crate) fn certificate_map(kid: &str) -> Value {
    let mut map = Map::new();
    map.insert(kid.to_owned(), Value::String(test_key().certificate_pem.clone()));
    Value::Object(map)
}

/// A service account key backed by the shared test key pair, together with
/// the PEM encoded public key.
pub(crate) fn test_service_account(token_uri: &str) -> (ServiceAccountKey, Vec<u8>) {
    let key = test_key();
    let account = ServiceAccountKey {
        project_id: Some(PROJECT_ID.into()),
        private_key_id: Some("mock-key-id".into()),
        private_key: key.private_pem.clone(),
        client_email: CLIENT_EMAIL.into(),
        client_id: Some("1234567890".into()),
        token_uri: token_uri.into(),
    };
    (account, key.public_pem.clone())
}

/// An authenticated HTTP client with near-instant retries.
pub(crate) fn test_http_client() -> HttpClient {
    HttpClient::new(
        reqwest::Client::new(),
        Some(Arc::new(StaticTokenSource::new("test-token"))),
    )
    .with_retry(RetryConfig {
        base_delay: Duration::from_millis(1),
        ..RetryConfig::default()
    })
}
