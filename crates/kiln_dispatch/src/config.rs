//! Dispatch service configuration.

use kiln_core::{Hash, RunId, Version};
use kiln_log::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Dispatch service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Directory holding run logs and uploads
    pub root: PathBuf,
    /// Live messages buffered per run before a watcher lags
    pub watch_capacity: usize,
    /// Messages per `logs` chunk
    pub log_chunk: usize,
    /// Schema version written into new logs and required of read ones
    pub schema_version: Version,
    /// Validity window of preambles the service writes itself
    pub preamble_validity: Duration,
    /// Run logs kept open before idle ones are released
    pub max_open_runs: usize,
}

impl DispatchConfig {
    /// Config rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watch_capacity: 1024,
            log_chunk: 256,
            schema_version: SCHEMA_VERSION,
            preamble_validity: Duration::from_secs(7 * 24 * 60 * 60),
            max_open_runs: 256,
        }
    }

    /// Set the live buffer size
    #[must_use]
    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity;
        self
    }

    /// Set the `logs` chunk size
    #[must_use]
    pub fn with_log_chunk(mut self, chunk: usize) -> Self {
        self.log_chunk = chunk;
        self
    }

    /// Set the schema version
    #[must_use]
    pub fn with_schema_version(mut self, version: Version) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the preamble validity window
    #[must_use]
    pub fn with_preamble_validity(mut self, validity: Duration) -> Self {
        self.preamble_validity = validity;
        self
    }

    /// Set how many run logs stay open
    #[must_use]
    pub fn with_max_open_runs(mut self, max: usize) -> Self {
        self.max_open_runs = max;
        self
    }

    /// Directory of run logs
    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Log file of `run`
    #[must_use]
    pub fn run_log_path(&self, run: RunId) -> PathBuf {
        self.runs_dir().join(format!("{run}.log"))
    }

    /// Record naming the artifact uploaded as `run`
    #[must_use]
    pub fn upload_record_path(&self, run: RunId) -> PathBuf {
        self.runs_dir().join(format!("{run}.upload"))
    }

    /// Stored artifact with digest `checksum`
    #[must_use]
    pub fn upload_path(&self, checksum: &Hash) -> PathBuf {
        self.uploads_dir().join(checksum.to_hex())
    }

    /// Directory of uploaded artifacts
    #[must_use]
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new("kiln-data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let config = DispatchConfig::new("/srv/kiln");
        let run = RunId::new();
        assert_eq!(
            config.run_log_path(run),
            PathBuf::from(format!("/srv/kiln/runs/{run}.log"))
        );
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/kiln/uploads"));
        assert_eq!(
            config.upload_record_path(run),
            PathBuf::from(format!("/srv/kiln/runs/{run}.upload"))
        );
        let digest = Hash::compute(b"artifact");
        assert_eq!(
            config.upload_path(&digest),
            PathBuf::from(format!("/srv/kiln/uploads/{}", digest.to_hex()))
        );
    }

    #[test]
    fn test_builders() {
        let config = DispatchConfig::default()
            .with_watch_capacity(4)
            .with_log_chunk(2)
            .with_schema_version(Version::new(2, 1, 0));
        assert_eq!(config.watch_capacity, 4);
        assert_eq!(config.log_chunk, 2);
        assert_eq!(config.schema_version, Version::new(2, 1, 0));
    }
}
