//! Configuration

use crate::core::preview::DEFAULT_BUCKET_SECS;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database configuration.
///
/// Every field has a default, so a config file only needs the keys it
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Catalog file; `None` keeps the catalog in memory only
    pub catalog_path: Option<PathBuf>,
    /// Width of one preview bucket in seconds
    pub preview_bucket_secs: u32,
    /// Files ingested concurrently during a bulk walk
    pub ingest_workers: usize,
    /// Map `public_username` to the public requester in authenticated queries
    pub allow_public_requester: bool,
    pub public_username: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: None,
            preview_bucket_secs: DEFAULT_BUCKET_SECS,
            ingest_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            allow_public_requester: false,
            public_username: "anonymous".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let config: Config = serde_json::from_slice(&raw).map_err(|e| {
            Error::Configuration(format!("'{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.preview_bucket_secs == 0 {
            return Err(Error::Configuration(
                "preview_bucket_secs must be positive".to_string(),
            ));
        }
        if self.ingest_workers == 0 {
            return Err(Error::Configuration(
                "ingest_workers must be positive".to_string(),
            ));
        }
        if self.allow_public_requester && self.public_username.is_empty() {
            return Err(Error::Configuration(
                "public_username must be set when the public requester is allowed".to_string(),
            ));
        }
        Ok(())
    }
}
