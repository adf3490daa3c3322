//! Remote image download for signature placeholders.
//!
//! [`ImageFetcher`] is the seam between the filler and the network; the
//! server uses [`HttpImageFetcher`], tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::FetchConfig;
use crate::error::FormError;

/// Downloads the raw bytes behind a URL.
///
/// Implementations report failures as [`FormError::RemoteFetch`].
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FormError>;
}

/// Fetches images over HTTP(S) with a per-request timeout. Non-2xx
/// responses and bodies over the size limit count as failures.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("formfill/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_image_bytes,
        })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FormError> {
        let remote_err = |message: String| FormError::RemoteFetch {
            url: url.to_string(),
            message,
        };
        let too_large = || remote_err(format!("image exceeds {} bytes", self.max_bytes));

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| remote_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(remote_err(format!("HTTP {}", status)));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(too_large());
            }
        }

        // Content-Length may be absent or wrong; enforce the cap while reading.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| remote_err(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}
