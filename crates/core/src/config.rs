use std::path::Path;

use serde::Deserialize;

pub const DEFAULT_METADATA_FILE: &str = "experiment.xml";
pub const DEFAULT_METRIC_SUFFIX: &str = ".metric-db";

/// Knobs for locating and reading a database directory.
///
/// Can be loaded from JSON; omitted fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// File name of the XML metadata inside the database directory.
    pub metadata_file: String,
    /// Suffix identifying per-process metric files.
    pub metric_suffix: String,
    /// Read metric files on the rayon thread pool.
    pub parallel: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            metadata_file: DEFAULT_METADATA_FILE.to_string(),
            metric_suffix: DEFAULT_METRIC_SUFFIX.to_string(),
            parallel: true,
        }
    }
}

impl ReaderConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn with_metadata_file(mut self, name: impl Into<String>) -> Self {
        self.metadata_file = name.into();
        self
    }

    pub fn with_metric_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.metric_suffix = suffix.into();
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn metadata_path(&self, dir: &Path) -> std::path::PathBuf {
        dir.join(&self.metadata_file)
    }
}
