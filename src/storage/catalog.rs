//! Catalog persistence: index records and restrictions

use crate::access::{Restriction, RestrictionTable};
use crate::core::segment::{FileRecord, Segment};
use crate::error::Result;
use crate::index::IndexSnapshot;
use crate::storage::catalog_file::{read_catalog, write_catalog};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Everything a catalog stores
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub generation: u64,
    pub files: Vec<FileRecord>,
    pub segments: Vec<Segment>,
    pub restrictions: Vec<Restriction>,
}

impl CatalogSnapshot {
    /// Capture an index snapshot and a restriction table
    pub fn capture(index: &IndexSnapshot, restrictions: &RestrictionTable) -> Self {
        let files: Vec<FileRecord> = index.files().map(|f| f.record.clone()).collect();
        let segments: Vec<Segment> = index
            .files()
            .flat_map(|f| f.segments.iter().map(|s| Segment::clone(s)))
            .collect();
        Self {
            generation: index.generation(),
            files,
            segments,
            restrictions: restrictions.iter().cloned().collect(),
        }
    }
}

/// Trait for catalog store implementations
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Load the last saved catalog, if any
    async fn load(&self) -> Result<Option<CatalogSnapshot>>;

    /// Replace the stored catalog
    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()>;
}

/// In-memory implementation of the catalog store
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    saved: Mutex<Option<CatalogSnapshot>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn load(&self) -> Result<Option<CatalogSnapshot>> {
        Ok(self.saved.lock().clone())
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        *self.saved.lock() = Some(snapshot.clone());
        Ok(())
    }
}

/// Catalog kept in a single catalog file
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogStore for FileCatalog {
    async fn load(&self) -> Result<Option<CatalogSnapshot>> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(path = %self.path.display(), "no catalog yet");
            return Ok(None);
        }
        let path = self.path.clone();
        let (header, snapshot) = tokio::task::spawn_blocking(move || read_catalog(&path)).await??;
        info!(
            path = %self.path.display(),
            generation = header.generation,
            files = header.file_count,
            segments = header.segment_count,
            "catalog loaded"
        );
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        let path = self.path.clone();
        let snapshot = snapshot.clone();
        let header = tokio::task::spawn_blocking(move || write_catalog(&path, &snapshot)).await??;
        info!(
            path = %self.path.display(),
            generation = header.generation,
            bytes = header.compressed_size,
            "catalog saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::RestrictionAuthority;
    use crate::core::identity::StreamIdentity;
    use crate::core::segment::{FileId, FileStat};
    use crate::core::temporal::{TimeWindow, Timestamp};
    use crate::index::{FileUpdate, SegmentIndex};
    use tempfile::TempDir;

    fn populated() -> (SegmentIndex, RestrictionAuthority) {
        let index = SegmentIndex::new();
        for (i, path) in ["/data/a.json", "/data/b.json"].into_iter().enumerate() {
            let start = Timestamp::from_secs(i as i64 * 100);
            index.upsert_file(FileUpdate {
                path: PathBuf::from(path),
                format: "JSON".into(),
                stat: FileStat {
                    size: 10,
                    mtime: start,
                    ctime: start,
                },
                gap_count: 0,
                overlap_count: 0,
                segments: vec![Segment {
                    identity: StreamIdentity::new("TA", "A25A", "", "BHZ"),
                    start,
                    end: start.add_nanos(10_000_000_000),
                    sampling_rate: 1.0,
                    sample_count: 11,
                    calibration: 1.0,
                    quality: None,
                    file: FileId(0),
                    position: 0,
                    preview: None,
                }],
            });
        }
        let authority = RestrictionAuthority::new();
        authority.restrict(Restriction::new("TA", "A25A", ["random"]));
        (index, authority)
    }

    async fn round_trip(store: &dyn CatalogStore) {
        assert!(store.load().await.unwrap().is_none());

        let (index, authority) = populated();
        let captured = CatalogSnapshot::capture(&index.snapshot(), &authority.snapshot());
        assert_eq!(captured.files.len(), 2);
        assert_eq!(captured.segments.len(), 2);
        store.save(&captured).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        let restored = SegmentIndex::new();
        restored.restore(loaded.files, loaded.segments).unwrap();
        let starts: Vec<i64> = restored
            .snapshot()
            .segments_overlapping(&TimeWindow::unbounded())
            .map(|s| s.start.as_secs())
            .collect();
        assert_eq!(starts, vec![0, 100]);
        assert_eq!(loaded.restrictions, vec![Restriction::new("TA", "A25A", ["random"])]);
    }

    #[tokio::test]
    async fn test_in_memory_catalog() {
        round_trip(&InMemoryCatalog::new()).await;
    }

    #[tokio::test]
    async fn test_file_catalog() {
        let dir = TempDir::new().unwrap();
        round_trip(&FileCatalog::new(dir.path().join("catalog.wfdb"))).await;
    }
}
