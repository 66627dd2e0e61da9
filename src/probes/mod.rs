//! Host probes.
//!
//! Probes are leaves: each one reads a piece of machine state and returns
//! a typed value, a [`Record`] or a list of records. They know nothing
//! about units, the store or the report. All filesystem access goes through
//! [`HostFs`] so a probe can be pointed at a fixture tree in tests.

pub mod basic;
pub mod hardware;
pub mod network;
pub mod security;
pub mod system;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::Record;

/// Probe errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The data is missing on this machine; the unit records an issue and
    /// carries on
    #[error("{0}")]
    Unavailable(String),

    /// The probe hit something that makes the whole unit unusable
    #[error("{0}")]
    Fatal(String),
}

impl ProbeError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    fn from_io(path: &Path, error: std::io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidData => {
                Self::Unavailable(format!("{}: {}", path.display(), error))
            }
            _ => Self::Fatal(format!("{}: {}", path.display(), error)),
        }
    }
}

/// Read-only view of the host filesystem below a root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFs {
    root: PathBuf,
}

impl Default for HostFs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of a host-relative path like `proc/uptime`
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative.trim_start_matches('/'))
    }

    pub async fn exists(&self, relative: &str) -> bool {
        tokio::fs::try_exists(self.path(relative))
            .await
            .unwrap_or(false)
    }

    pub async fn read_to_string(&self, relative: &str) -> Result<String, ProbeError> {
        let path = self.path(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ProbeError::from_io(&path, e))
    }

    /// First line of a file, trimmed
    pub async fn read_line(&self, relative: &str) -> Result<String, ProbeError> {
        let text = self.read_to_string(relative).await?;
        Ok(text.lines().next().unwrap_or("").trim().to_string())
    }

    pub async fn read_bytes(&self, relative: &str) -> Result<Vec<u8>, ProbeError> {
        let path = self.path(relative);
        tokio::fs::read(&path)
            .await
            .map_err(|e| ProbeError::from_io(&path, e))
    }

    pub async fn read_link(&self, relative: &str) -> Result<PathBuf, ProbeError> {
        let path = self.path(relative);
        tokio::fs::read_link(&path)
            .await
            .map_err(|e| ProbeError::from_io(&path, e))
    }

    /// Names of the entries in a directory, sorted
    pub async fn list_dir(&self, relative: &str) -> Result<Vec<String>, ProbeError> {
        let path = self.path(relative);
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ProbeError::from_io(&path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProbeError::from_io(&path, e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Parse `key<sep>value` lines into a map. Blank lines and `#` comments are
/// skipped; surrounding quotes on values are removed.
pub fn parse_key_values(text: &str, separator: char) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(separator))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Build a [`Record`] from key/value pairs
pub fn record<I, K, V>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
pub(crate) mod fixture {
    //! Fixture host trees for probe tests.

    use std::path::Path;

    use tempfile::TempDir;

    use super::HostFs;

    pub struct FixtureHost {
        pub dir: TempDir,
        pub fs: HostFs,
    }

    impl FixtureHost {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let fs = HostFs::new(dir.path());
            Self { dir, fs }
        }

        pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) -> &Self {
            let path = self.dir.path().join(relative);
            std::fs::create_dir_all(path.parent().unwrap_or(Path::new("."))).unwrap();
            std::fs::write(path, contents).unwrap();
            self
        }

        pub fn mkdir(&self, relative: &str) -> &Self {
            std::fs::create_dir_all(self.dir.path().join(relative)).unwrap();
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::FixtureHost;
    use super::*;

    #[test]
    fn test_parse_key_values() {
        let text = "# comment\nNAME=\"Ubuntu\"\nID=ubuntu\n\nPATH='/usr/bin'\nbroken line\n";
        let pairs = parse_key_values(text, '=');
        assert_eq!(
            pairs,
            vec![
                ("NAME".to_string(), "Ubuntu".to_string()),
                ("ID".to_string(), "ubuntu".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let host = FixtureHost::new();
        let err = host.fs.read_to_string("proc/uptime").await.unwrap_err();
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_list_dir_sorted() {
        let host = FixtureHost::new();
        host.write("sys/class/net/wlan0/mtu", "1500")
            .write("sys/class/net/eth0/mtu", "1500");

        assert_eq!(
            host.fs.list_dir("sys/class/net").await.unwrap(),
            vec!["eth0".to_string(), "wlan0".to_string()]
        );
        assert_eq!(host.fs.read_line("sys/class/net/eth0/mtu").await.unwrap(), "1500");
    }
}
