//! Storage shared-key request signing.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::Sha256;

use super::error::AzureError;

/// Blob service version sent with signed requests.
pub const STORAGE_API_VERSION: &str = "2020-04-08";

/// A storage account access key.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKeyCredential {
    account: String,
    key: String,
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SharedKeyCredential {
    /// Creates a credential from a base64-encoded account key.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Signing`] when `key` is not valid base64.
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Result<Self, AzureError> {
        let credential = Self {
            account: account.into(),
            key: key.into(),
        };
        credential.decoded_key()?;
        Ok(credential)
    }

    /// Storage account the key belongs to.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64-encoded key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn decoded_key(&self) -> Result<Vec<u8>, AzureError> {
        STANDARD.decode(&self.key).map_err(|err| self.signing_error(&err))
    }

    fn signing_error(&self, err: &dyn fmt::Display) -> AzureError {
        AzureError::Signing {
            account: self.account.clone(),
            message: err.to_string(),
        }
    }

    /// Computes the `Authorization` header for a blob `GET` of `url` sent
    /// with the given `x-ms-date`.
    ///
    /// # Errors
    ///
    /// Returns [`AzureError::Signing`] when the key cannot be used.
    pub fn authorization(&self, url: &Url, date: &str) -> Result<String, AzureError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.decoded_key()?)
            .map_err(|err| self.signing_error(&err))?;
        mac.update(string_to_sign(&self.account, url, date).as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{signature}", self.account))
    }
}

fn string_to_sign(account: &str, url: &Url, date: &str) -> String {
    // Verb, eleven empty standard headers, then the canonical headers.
    let mut text = String::from("GET");
    text.push_str(&"\n".repeat(12));
    text.push_str(&format!(
        "x-ms-date:{date}\nx-ms-version:{STORAGE_API_VERSION}\n"
    ));
    text.push_str(&canonical_resource(account, url));
    text
}

fn canonical_resource(account: &str, url: &Url) -> String {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| (name.to_lowercase(), value.into_owned()))
        .collect();
    params.sort();

    let mut resource = format!("/{account}{}", url.path());
    let mut index = 0;
    while let Some((name, _)) = params.get(index) {
        let values: Vec<&str> = params
            .iter()
            .skip(index)
            .take_while(|(other, _)| other == name)
            .map(|(_, value)| value.as_str())
            .collect();
        resource.push_str(&format!("\n{name}:{}", values.join(",")));
        index += values.len();
    }
    resource
}

/// Returns `true` when `uri` carries a shared access signature and can be
/// fetched without an account key.
#[must_use]
pub fn is_signed_url(uri: &str) -> bool {
    Url::parse(uri).is_ok_and(|url| url.query_pairs().any(|(name, _)| name == "sig"))
}
