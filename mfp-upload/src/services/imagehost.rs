//! Image hosting service client
//!
//! The tabular database cannot accept direct binary uploads, so images are
//! staged on a Cloudinary-style hosting service first and referenced by
//! URL. Requests are signed with a SHA-256 digest of the sorted parameters
//! and the account secret. Hosted copies are deleted again once the
//! database has fetched the image.

use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use mfp_common::config::IniConfig;

const DEFAULT_API_URL: &str = "https://api.cloudinary.com/v1_1";

/// Image host client errors
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error {0}: {1}")]
    Api(u16, String),
}

impl From<mfp_common::Error> for HostError {
    fn from(e: mfp_common::Error) -> Self {
        HostError::Config(e.to_string())
    }
}

/// A successfully hosted image: the URL the database will fetch from and
/// the opaque id needed to delete the copy again.
#[derive(Debug, Clone, Deserialize)]
pub struct HostedImage {
    pub secure_url: String,
    pub public_id: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

/// Client for one hosting account.
#[derive(Debug, Clone)]
pub struct ImageHostClient {
    http: reqwest::Client,
    api_url: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

impl ImageHostClient {
    pub fn new(
        api_url: &str,
        cloud_name: &str,
        api_key: &str,
        api_secret: &str,
        proxy: Option<&str>,
    ) -> Result<Self, HostError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(HostError::Network)?);
        }
        Ok(Self {
            http: builder.build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            cloud_name: cloud_name.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    /// Build a client from an INI config (`cloud_name`, `api_key`,
    /// `api_secret`, optional `api_proxy` and `api_url`).
    pub fn from_config(config: &IniConfig) -> Result<Self, HostError> {
        Self::new(
            config.get_or("api_url", DEFAULT_API_URL),
            config.get("cloud_name")?,
            config.get("api_key")?,
            config.get("api_secret")?,
            config.get("api_proxy").ok(),
        )
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", self.api_url, self.cloud_name, action)
    }

    /// SHA-256 signature over the sorted request parameters plus secret.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort();
        let payload = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let digest = Sha256::digest(format!("{}{}", payload, self.api_secret));
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, HostError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(HostError::Api(status.as_u16(), body))
        }
    }

    /// Upload a local image. Returns the hosted URL and public id.
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<HostedImage, HostError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("timestamp", &timestamp)]);

        let form = reqwest::multipart::Form::new()
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .http
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?;
        let hosted: HostedImage = Self::check(response).await?.json().await?;
        debug!("hosted {} as {}", path.display(), hosted.public_id);
        Ok(hosted)
    }

    /// Delete a hosted image by public id.
    pub async fn destroy(&self, public_id: &str) -> Result<(), HostError> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", &timestamp)]);

        let params = [
            ("public_id", public_id),
            ("timestamp", &timestamp),
            ("api_key", &self.api_key),
            ("signature", &signature),
        ];
        let response = self
            .http
            .post(self.endpoint("destroy"))
            .form(&params)
            .send()
            .await?;
        let result: DestroyResponse = Self::check(response).await?.json().await?;
        debug!("destroyed {}: {}", public_id, result.result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_order_independent() {
        let client =
            ImageHostClient::new("http://localhost", "test-cloud", "key", "secret", None)
                .unwrap();
        let a = client.sign(&[("timestamp", "100"), ("public_id", "abc")]);
        let b = client.sign(&[("public_id", "abc"), ("timestamp", "100")]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
