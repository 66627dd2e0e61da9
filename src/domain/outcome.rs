//! Terminal outcome of a logical run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The one result a logical run reports to the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    /// Local-only mode: the report was written to `path`
    SavedLocally { path: PathBuf },

    /// The report was uploaded and can be viewed at `url`
    Uploaded { url: String },

    /// Upload failed; the report was saved to `path` instead
    UploadFailed { path: PathBuf, reason: String },

    /// The pipeline hit an internal defect
    Fatal { reason: String },
}

impl Outcome {
    /// Whether the report reached its destination in some form
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Self::Fatal { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SavedLocally { path } => write!(f, "saved to {}", path.display()),
            Self::Uploaded { url } => write!(f, "uploaded to {}", url),
            Self::UploadFailed { path, reason } => {
                write!(f, "upload failed ({}), saved to {}", reason, path.display())
            }
            Self::Fatal { reason } => write!(f, "fatal: {}", reason),
        }
    }
}
