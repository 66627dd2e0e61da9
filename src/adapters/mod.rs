//! Adapter interfaces for external systems.
//!
//! Adapters connect the pipeline to the outside world: the HTTP endpoint
//! that receives uploaded reports, the shell that reacts to the run's
//! terminal signal and the optional progress sink.

pub mod shell;
pub mod upload;

use async_trait::async_trait;

pub use shell::{signal, ConsoleProgress, ConsoleShell, Progress, Shell};
pub use upload::{HttpUploader, UploadError};

/// Trait for report upload transports
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Send the report body once and return the shareable URL
    async fn upload(&self, body: &str) -> Result<String, UploadError>;
}
