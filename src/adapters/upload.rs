//! HTTP upload of the serialized report.
//!
//! Endpoint: POST {origin}/{endpoint}
//! Body: the redacted canonical JSON, `Content-Type: application/json`
//! Success: any 2xx with a `Location` header; the shareable URL is the
//! origin joined with that location.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use thiserror::Error;
use tracing::{debug, instrument};

use super::Uploader;

/// Default upload origin
pub const DEFAULT_ORIGIN: &str = "https://spec-ify.com";

/// Default upload path below the origin
pub const DEFAULT_ENDPOINT: &str = "upload.php";

/// Why an upload did not produce a URL
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(String),

    #[error("upload rejected with HTTP {status}")]
    Status { status: u16 },

    #[error("upload response had no Location header")]
    MissingLocation,
}

/// Uploads reports with reqwest
#[derive(Debug, Clone)]
pub struct HttpUploader {
    origin: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpUploader {
    /// Create an uploader with a request timeout
    pub fn new(origin: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            endpoint: endpoint.into().trim_start_matches('/').to_string(),
            client,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Full URL the report is posted to
    pub fn endpoint_url(&self) -> String {
        format!("{}/{}", self.origin, self.endpoint)
    }
}

/// Join the upload origin with a `Location` header value
pub fn compose_url(origin: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    let origin = origin.trim_end_matches('/');
    if location.starts_with('/') {
        format!("{}{}", origin, location)
    } else {
        format!("{}/{}", origin, location)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, body), fields(url = %self.endpoint_url(), bytes = body.len()))]
    async fn upload(&self, body: &str) -> Result<String, UploadError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(UploadError::MissingLocation)?;

        let url = compose_url(&self.origin, location);
        debug!(%url, "Upload accepted");
        Ok(url)
    }
}
