//! Report delivery: local save and one-shot upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use crate::adapters::{UploadError, Uploader};

/// Default local artifact name
pub const DEFAULT_OUTPUT: &str = "specify_specs.json";

/// Delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to write report to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("no upload transport configured")]
    NoUploader,
}

/// Where and how a report is delivered
#[derive(Clone)]
pub struct Delivery {
    output: PathBuf,
    uploader: Option<Arc<dyn Uploader>>,
}

impl Delivery {
    /// Save to `output` only
    pub fn local_only(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            uploader: None,
        }
    }

    /// Upload through `uploader`, saving to `output` if that fails
    pub fn with_uploader(output: impl Into<PathBuf>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            output: output.into(),
            uploader: Some(uploader),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_local_only(&self) -> bool {
        self.uploader.is_none()
    }

    /// Write `text` to the output path, creating parent directories
    #[instrument(skip(self, text), fields(path = %self.output.display()))]
    pub async fn save_local(&self, text: &str) -> Result<PathBuf, DeliveryError> {
        let write_err = |source| DeliveryError::Write {
            path: self.output.clone(),
            source,
        };

        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        tokio::fs::write(&self.output, text).await.map_err(write_err)?;

        info!(bytes = text.len(), "Report saved");
        Ok(self.output.clone())
    }

    /// One upload attempt. No fallback here; the caller decides.
    pub async fn upload(&self, text: &str) -> Result<String, DeliveryError> {
        let uploader = self.uploader.as_ref().ok_or(DeliveryError::NoUploader)?;
        let url = uploader.upload(text).await?;
        info!(transport = uploader.name(), %url, "Report uploaded");
        Ok(url)
    }

}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("output", &self.output)
            .field("uploader", &self.uploader.as_ref().map(|u| u.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Rejecting;

    #[async_trait]
    impl Uploader for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn upload(&self, _body: &str) -> Result<String, UploadError> {
            Err(UploadError::Status { status: 500 })
        }
    }

    #[tokio::test]
    async fn test_local_save_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/report.json");
        let delivery = Delivery::local_only(&path);

        let saved = delivery.save_local("{}\n").await.unwrap();

        assert_eq!(saved, path);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[tokio::test]
    async fn test_upload_error_is_surfaced() {
        let temp = TempDir::new().unwrap();
        let delivery = Delivery::with_uploader(temp.path().join("r.json"), Arc::new(Rejecting));

        let err = delivery.upload("{}").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Upload(UploadError::Status { status: 500 })));
        assert!(!temp.path().join("r.json").exists());
    }

    #[tokio::test]
    async fn test_upload_without_transport() {
        let delivery = Delivery::local_only("unused.json");
        assert!(matches!(
            delivery.upload("{}").await,
            Err(DeliveryError::NoUploader)
        ));
    }
}
