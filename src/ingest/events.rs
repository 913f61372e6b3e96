//! Filesystem events and bulk directory indexing

use crate::error::{Error, Result};
use crate::ingest::pipeline::{normalize_path, IngestOutcome, Ingestor};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Kind of change reported by a file monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Modified,
    Deleted,
    Moved,
}

/// One file monitor notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsEvent {
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub is_directory: bool,
    pub src_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_path: Option<PathBuf>,
}

impl FsEvent {
    pub fn file(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            is_directory: false,
            src_path: path.into(),
            dest_path: None,
        }
    }

    pub fn directory(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            is_directory: true,
            ..Self::file(kind, path)
        }
    }

    pub fn moved(src: impl Into<PathBuf>, dest: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: EventKind::Moved,
            is_directory,
            src_path: src.into(),
            dest_path: Some(dest.into()),
        }
    }

    fn destination(&self) -> Result<PathBuf> {
        let dest = self.dest_path.as_deref().ok_or_else(|| {
            Error::InvalidEvent(format!("move of '{}' without destination", self.src_path.display()))
        })?;
        normalize_path(dest)
    }
}

/// What handling an event did to the index
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Ingested(IngestOutcome),
    FileDeleted,
    AlreadyDeleted,
    NotMoved,
    FileMoved { source_directory_pruned: bool },
    DirectoryDeleted(usize),
    DirectoryMoved(usize),
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventOutcome::Ingested(IngestOutcome::Indexed(record)) => {
                write!(f, "File indexed as {}.", record.id)
            }
            EventOutcome::Ingested(IngestOutcome::Unchanged(_)) => f.write_str("File unchanged."),
            EventOutcome::FileDeleted => f.write_str("File deleted."),
            EventOutcome::AlreadyDeleted => f.write_str("File already deleted."),
            EventOutcome::NotMoved => f.write_str("File not moved."),
            EventOutcome::FileMoved {
                source_directory_pruned: true,
            } => f.write_str("File moved, old path deleted."),
            EventOutcome::FileMoved { .. } => f.write_str("File moved, path untouched."),
            EventOutcome::DirectoryDeleted(n) => write!(f, "Deleted path ({} files).", n),
            EventOutcome::DirectoryMoved(n) => write!(f, "Moved path ({} files).", n),
        }
    }
}

/// Result of indexing a directory tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    /// Records removed by a purge before the walk
    pub purged: usize,
    pub indexed: Vec<PathBuf>,
    pub unchanged: usize,
    /// Files that could not be indexed, with the reason
    pub failed: Vec<(PathBuf, String)>,
}

impl BulkReport {
    pub fn total(&self) -> usize {
        self.indexed.len() + self.unchanged + self.failed.len()
    }
}

impl Ingestor {
    /// Apply one file monitor event to the index
    #[instrument(skip_all, fields(kind = ?event.kind, src = %event.src_path.display()))]
    pub async fn handle_event(&self, event: &FsEvent) -> Result<EventOutcome> {
        let src = normalize_path(&event.src_path)?;
        let outcome = match (event.is_directory, event.kind) {
            (false, EventKind::Created | EventKind::Modified) => {
                EventOutcome::Ingested(self.ingest(&src).await?)
            }
            (false, EventKind::Deleted) => match self.index().delete_file(&src) {
                Some(_) => EventOutcome::FileDeleted,
                None => EventOutcome::AlreadyDeleted,
            },
            (false, EventKind::Moved) => {
                let dest = event.destination()?;
                if dest == src {
                    EventOutcome::NotMoved
                } else if self.index().snapshot().file_by_path(&src).is_none() {
                    // never indexed under its old name; treat as a new file
                    EventOutcome::Ingested(self.ingest(&dest).await?)
                } else {
                    let record = self.index().rename_file(&src, &dest)?;
                    let source_dir = src.parent().unwrap_or_else(|| Path::new("/"));
                    let still_used = self
                        .index()
                        .snapshot()
                        .directories()
                        .any(|d| d == source_dir);
                    info!(file = %record.id, dest = %dest.display(), "file moved");
                    EventOutcome::FileMoved {
                        source_directory_pruned: !still_used,
                    }
                }
            }
            (true, EventKind::Deleted) => {
                EventOutcome::DirectoryDeleted(self.index().delete_directory(&src))
            }
            (true, EventKind::Moved) => {
                let dest = event.destination()?;
                EventOutcome::DirectoryMoved(self.index().rename_directory(&src, &dest))
            }
            (true, kind) => {
                return Err(Error::InvalidEvent(format!(
                    "{:?} directory events are not indexed",
                    kind
                )))
            }
        };
        info!(outcome = %outcome, "event handled");
        Ok(outcome)
    }

    /// Index every file below `root` with up to `workers` files in flight.
    ///
    /// With `purge`, every record at or below `root` is removed first so
    /// that files deleted while nobody was watching disappear too. A file
    /// that fails to index is reported and does not stop the walk.
    #[instrument(skip(self))]
    pub async fn index_path(&self, root: &Path, purge: bool, workers: usize) -> Result<BulkReport> {
        let root = normalize_path(root)?;
        let mut report = BulkReport::default();
        if purge {
            report.purged = self.index().delete_directory(&root);
            info!(purged = report.purged, "purged records below root");
        }

        let walk_root = root.clone();
        let files = tokio::task::spawn_blocking(move || walk(&walk_root)).await??;
        info!(files = files.len(), "indexing");

        let results: Vec<(PathBuf, Result<IngestOutcome>)> = stream::iter(files)
            .map(|path| async move {
                let outcome = self.ingest(&path).await;
                (path, outcome)
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        for (path, result) in results {
            match result {
                Ok(IngestOutcome::Indexed(_)) => report.indexed.push(path),
                Ok(IngestOutcome::Unchanged(_)) => report.unchanged += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file not indexed");
                    report.failed.push((path, e.to_string()));
                }
            }
        }
        report.indexed.sort();
        report.failed.sort();
        info!(
            indexed = report.indexed.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "indexing finished"
        );
        Ok(report)
    }
}

/// Regular files at or below `root`, sorted
fn walk(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}
