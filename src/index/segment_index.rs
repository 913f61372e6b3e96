//! Segment index: files, their segments, and per-stream timelines.
//!
//! The index is a chain of immutable [`IndexSnapshot`]s. Readers take the
//! current snapshot (an `Arc` clone) and keep using it for as long as they
//! like; writers build the next snapshot from a copy of the current one and
//! swap the pointer. A reader therefore sees either all or none of a file
//! replacement. Snapshots share timelines and file entries through `Arc`, so
//! a copy costs one pointer per stream and per file, and a write only clones
//! the timelines it touches.

use crate::core::identity::StreamIdentity;
use crate::core::segment::{FileId, FileRecord, FileStat, Segment};
use crate::core::temporal::TimeWindow;
use crate::error::{Error, Result};
use crate::index::timeline::StreamTimeline;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An indexed file together with the segments it owns, ordered by position
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub record: FileRecord,
    pub segments: Vec<Arc<Segment>>,
}

/// Everything needed to (re)index one file
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub format: String,
    pub stat: FileStat,
    pub gap_count: u32,
    pub overlap_count: u32,
    /// Segments in source order; `file` and `position` are assigned on insert
    pub segments: Vec<Segment>,
}

/// Index counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub generation: u64,
    pub files: usize,
    pub segments: usize,
    pub streams: usize,
    pub directories: usize,
}

/// Immutable view of the index at one generation
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    generation: u64,
    next_file_id: u64,
    streams: BTreeMap<StreamIdentity, Arc<StreamTimeline>>,
    files: HashMap<FileId, Arc<IndexedFile>>,
    paths: BTreeMap<PathBuf, FileId>,
    /// Directory -> number of indexed files directly inside it
    directories: BTreeMap<PathBuf, usize>,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            generation: self.generation,
            files: self.files.len(),
            segments: self.streams.values().map(|t| t.len()).sum(),
            streams: self.streams.len(),
            directories: self.directories.len(),
        }
    }

    /// Stream identities present in the index, in sort order
    pub fn identities(&self) -> impl Iterator<Item = &StreamIdentity> {
        self.streams.keys()
    }

    /// Timelines in identity order
    pub fn streams(&self) -> impl Iterator<Item = (&StreamIdentity, &Arc<StreamTimeline>)> {
        self.streams.iter()
    }

    pub fn timeline(&self, identity: &StreamIdentity) -> Option<&Arc<StreamTimeline>> {
        self.streams.get(identity)
    }

    pub fn file(&self, id: FileId) -> Option<&Arc<IndexedFile>> {
        self.files.get(&id)
    }

    pub fn file_by_path(&self, path: &Path) -> Option<&Arc<IndexedFile>> {
        self.paths.get(path).and_then(|id| self.files.get(id))
    }

    /// Indexed files ordered by path
    pub fn files(&self) -> impl Iterator<Item = &Arc<IndexedFile>> {
        self.paths.values().filter_map(|id| self.files.get(id))
    }

    /// Directories holding at least one indexed file
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.directories.keys().map(|p| p.as_path())
    }

    /// Segments intersecting `window` across all streams, in
    /// (identity, start, position) order. Lazy: each stream's timeline is
    /// only visited once the previous one is exhausted.
    pub fn segments_overlapping<'a>(
        &'a self,
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a Arc<Segment>> + 'a {
        self.streams
            .values()
            .flat_map(move |timeline| timeline.overlapping(window))
    }

    fn paths_under<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = (&'a PathBuf, &'a FileId)> {
        self.paths
            .range::<Path, _>((std::ops::Bound::Included(dir), std::ops::Bound::Unbounded))
            .take_while(move |(path, _)| path.starts_with(dir))
    }

    fn insert_file(&mut self, update: FileUpdate) -> FileRecord {
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        let record = FileRecord {
            id,
            path: update.path,
            format: update.format,
            stat: update.stat,
            gap_count: update.gap_count,
            overlap_count: update.overlap_count,
        };

        let segments: Vec<Arc<Segment>> = update
            .segments
            .into_iter()
            .enumerate()
            .map(|(position, mut segment)| {
                segment.file = id;
                segment.position = position as u32;
                Arc::new(segment)
            })
            .collect();
        self.attach(record.clone(), segments);
        record
    }

    /// Link a file and its (already numbered) segments into every structure
    fn attach(&mut self, record: FileRecord, segments: Vec<Arc<Segment>>) {
        for segment in &segments {
            let timeline = self.streams.entry(segment.identity.clone()).or_default();
            Arc::make_mut(timeline).insert(segment.clone());
        }
        *self
            .directories
            .entry(record.directory().to_path_buf())
            .or_insert(0) += 1;
        self.paths.insert(record.path.clone(), record.id);
        self.next_file_id = self.next_file_id.max(record.id.0 + 1);
        self.files
            .insert(record.id, Arc::new(IndexedFile { record, segments }));
    }

    /// Unlink a file and cascade to its segments; prunes emptied directories
    fn detach(&mut self, id: FileId) -> Option<Arc<IndexedFile>> {
        let entry = self.files.remove(&id)?;
        self.paths.remove(&entry.record.path);
        self.release_directory(entry.record.directory());

        for segment in &entry.segments {
            let now_empty = match self.streams.get_mut(&segment.identity) {
                Some(timeline) => {
                    let timeline = Arc::make_mut(timeline);
                    timeline.remove(&segment.key());
                    timeline.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.streams.remove(&segment.identity);
            }
        }
        Some(entry)
    }

    fn release_directory(&mut self, dir: &Path) {
        if let Some(count) = self.directories.get_mut(dir) {
            *count -= 1;
            if *count == 0 {
                self.directories.remove(dir);
            }
        }
    }

    /// Move a file entry to `dest` without touching its segments.
    /// Whatever was indexed at `dest` before is dropped.
    fn relocate(&mut self, id: FileId, dest: PathBuf) -> Option<FileRecord> {
        let entry = self.files.get(&id)?.clone();
        if let Some(existing) = self.paths.get(&dest).copied() {
            if existing != id {
                self.detach(existing);
            }
        }
        self.paths.remove(&entry.record.path);
        self.release_directory(entry.record.directory());

        let mut record = entry.record.clone();
        record.path = dest;
        *self
            .directories
            .entry(record.directory().to_path_buf())
            .or_insert(0) += 1;
        self.paths.insert(record.path.clone(), id);
        self.files.insert(
            id,
            Arc::new(IndexedFile {
                record: record.clone(),
                segments: entry.segments.clone(),
            }),
        );
        Some(record)
    }
}

/// Process-wide segment index
#[derive(Debug, Default)]
pub struct SegmentIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes writers; readers never take it
    writer: Mutex<()>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; stays valid and unchanged for as long as it is held
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }

    /// Stat triple recorded for `path`, if indexed
    pub fn file_stat(&self, path: &Path) -> Option<FileStat> {
        self.snapshot().file_by_path(path).map(|f| f.record.stat)
    }

    /// Build the next snapshot with `f` and publish it in one pointer swap
    fn write<R>(&self, f: impl FnOnce(&mut IndexSnapshot) -> R) -> R {
        let _guard = self.writer.lock();
        let mut next = IndexSnapshot::clone(&self.snapshot());
        let result = f(&mut next);
        next.generation += 1;
        *self.current.write() = Arc::new(next);
        result
    }

    /// Replace everything indexed for `update.path` with `update`.
    ///
    /// Delete and insert are published together: no reader can observe the
    /// file without segments, or a mix of old and new segments.
    pub fn upsert_file(&self, update: FileUpdate) -> FileRecord {
        self.write(|snapshot| {
            if let Some(id) = snapshot.paths.get(&update.path).copied() {
                snapshot.detach(id);
            }
            snapshot.insert_file(update)
        })
    }

    /// Remove the file at `path` and its segments
    pub fn delete_file(&self, path: &Path) -> Option<FileRecord> {
        if self.snapshot().file_by_path(path).is_none() {
            return None;
        }
        self.write(|snapshot| {
            let id = snapshot.paths.get(path).copied()?;
            snapshot.detach(id).map(|entry| entry.record.clone())
        })
    }

    /// Point the file indexed at `src` to `dest`; segments are kept as they are.
    ///
    /// A file already indexed at `dest` is replaced.
    pub fn rename_file(&self, src: &Path, dest: &Path) -> Result<FileRecord> {
        self.write(|snapshot| {
            let id = snapshot.paths.get(src).copied().ok_or_else(|| {
                Error::Index(format!("'{}' is not indexed", src.display()))
            })?;
            snapshot
                .relocate(id, dest.to_path_buf())
                .ok_or_else(|| Error::Index(format!("'{}' vanished during rename", src.display())))
        })
    }

    /// Remove every file at or below `dir`; returns the number removed
    pub fn delete_directory(&self, dir: &Path) -> usize {
        if self.snapshot().paths_under(dir).next().is_none() {
            return 0;
        }
        self.write(|snapshot| {
            let ids: Vec<FileId> = snapshot.paths_under(dir).map(|(_, id)| *id).collect();
            ids.into_iter()
                .filter(|id| snapshot.detach(*id).is_some())
                .count()
        })
    }

    /// Re-root every file below `src` under `dest`; returns the number moved
    pub fn rename_directory(&self, src: &Path, dest: &Path) -> usize {
        if self.snapshot().paths_under(src).next().is_none() {
            return 0;
        }
        self.write(|snapshot| {
            let moves: Vec<(FileId, PathBuf)> = snapshot
                .paths_under(src)
                .filter_map(|(path, id)| {
                    path.strip_prefix(src).ok().map(|rest| (*id, dest.join(rest)))
                })
                .collect();
            moves
                .into_iter()
                .filter(|(id, new_path)| snapshot.relocate(*id, new_path.clone()).is_some())
                .count()
        })
    }

    /// Replace the whole index with previously persisted records
    pub fn restore(&self, files: Vec<FileRecord>, segments: Vec<Segment>) -> Result<()> {
        let mut by_file: HashMap<FileId, Vec<Arc<Segment>>> = HashMap::new();
        for segment in segments {
            by_file.entry(segment.file).or_default().push(Arc::new(segment));
        }

        let mut restored = IndexSnapshot::default();
        for record in files {
            let mut owned = by_file.remove(&record.id).unwrap_or_default();
            owned.sort_by_key(|s| s.position);
            restored.attach(record, owned);
        }
        if let Some(orphan) = by_file.keys().next() {
            return Err(Error::Index(format!(
                "persisted segments reference unknown {}",
                orphan
            )));
        }

        self.write(move |snapshot| {
            let generation = snapshot.generation;
            *snapshot = restored;
            snapshot.generation = generation;
        });
        Ok(())
    }
}
