//! Ingestion of single waveform files into the segment index

use crate::codec::{Trace, WaveformCodec};
use crate::core::preview::Preview;
use crate::core::segment::{FileId, FileRecord, FileStat, Segment};
use crate::error::{Error, Result};
use crate::index::{FileUpdate, SegmentIndex};
use crate::ingest::continuity;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

/// What ingesting one file did
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The file was (re)indexed
    Indexed(FileRecord),
    /// Size, mtime and ctime match the indexed record; nothing was read
    Unchanged(FileId),
}

/// Turns files into segments and publishes them in the index.
///
/// Distinct paths are ingested in parallel. Requests for the same path wait
/// for each other on a per-path lock, so two replaces of one file never
/// interleave.
pub struct Ingestor {
    index: Arc<SegmentIndex>,
    codec: Arc<dyn WaveformCodec>,
    preview_bucket_secs: u32,
    in_flight: Arc<PathLocks>,
}

type PathLocks = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Drops the path's lock entry once nobody else references it
struct LockEntry {
    table: Arc<PathLocks>,
    path: PathBuf,
}

impl Drop for LockEntry {
    fn drop(&mut self) {
        self.table
            .remove_if(&self.path, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Exclusive hold on one path; the guard is released before the entry is pruned
struct PathLease {
    _guard: OwnedMutexGuard<()>,
    _entry: LockEntry,
}

impl Ingestor {
    pub fn new(
        index: Arc<SegmentIndex>,
        codec: Arc<dyn WaveformCodec>,
        preview_bucket_secs: u32,
    ) -> Self {
        Self {
            index,
            codec,
            preview_bucket_secs,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    /// Ingest the file at `path`
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn ingest(&self, path: impl AsRef<Path>) -> Result<IngestOutcome> {
        let path = normalize_path(path.as_ref())?;
        let entry = LockEntry {
            table: self.in_flight.clone(),
            path: path.clone(),
        };
        let lock = self
            .in_flight
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        // the lease travels with the blocking work, so dropping this future
        // does not let another ingest of the path start early
        let lease = PathLease {
            _guard: guard,
            _entry: entry,
        };
        let index = self.index.clone();
        let codec = self.codec.clone();
        let bucket_secs = self.preview_bucket_secs;
        tokio::task::spawn_blocking(move || {
            let _lease = lease;
            ingest_file(&index, codec.as_ref(), &path, bucket_secs)
        })
        .await?
    }

    /// Number of paths with an ingestion running or waiting
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Synchronous ingestion of one file; `path` must already be normalized.
///
/// A file whose stat triple matches its record is left alone. Otherwise the
/// container is decoded and all of its segments replace the previous ones in
/// a single index write. When a previously indexed file no longer decodes,
/// its stale record is dropped before the error is returned.
pub fn ingest_file(
    index: &SegmentIndex,
    codec: &dyn WaveformCodec,
    path: &Path,
    preview_bucket_secs: u32,
) -> Result<IngestOutcome> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(Error::decode(path, "not a regular file"));
    }
    let stat = FileStat::from_metadata(&meta)?;

    if let Some(entry) = index.snapshot().file_by_path(path) {
        if entry.record.stat == stat {
            debug!("unchanged since last ingestion");
            return Ok(IngestOutcome::Unchanged(entry.record.id));
        }
    }

    let decoded = match codec.decode(path) {
        Ok(decoded) if decoded.traces.is_empty() => Err(Error::EmptyContainer(path.to_path_buf())),
        other => other,
    };
    let decoded = match decoded {
        Ok(decoded) => decoded,
        Err(e) => {
            if index.delete_file(path).is_some() {
                warn!(error = %e, "dropped stale record of undecodable file");
            }
            return Err(e);
        }
    };

    let segments: Vec<Segment> = decoded
        .traces
        .iter()
        .map(|trace| build_segment(trace, preview_bucket_secs))
        .collect();
    let continuity = continuity::assess(&segments);

    let record = index.upsert_file(FileUpdate {
        path: path.to_path_buf(),
        format: decoded.format,
        stat,
        gap_count: continuity.gaps,
        overlap_count: continuity.overlaps,
        segments,
    });
    info!(
        file = %record.id,
        format = %record.format,
        segments = decoded.traces.len(),
        gaps = record.gap_count,
        overlaps = record.overlap_count,
        "file indexed"
    );
    Ok(IngestOutcome::Indexed(record))
}

/// Segment metadata for one decoded trace; `file` and `position` are
/// assigned by the index.
pub fn build_segment(trace: &Trace, preview_bucket_secs: u32) -> Segment {
    let sample_count = trace.samples.len() as u64;
    Segment {
        identity: trace.identity(),
        start: trace.start,
        end: Segment::end_time(trace.start, sample_count, trace.sampling_rate),
        sampling_rate: trace.sampling_rate,
        sample_count,
        calibration: trace.calibration.unwrap_or(1.0),
        quality: trace.quality.clone(),
        file: FileId(0),
        position: 0,
        preview: Preview::build(
            trace.start,
            trace.sampling_rate,
            &trace.samples,
            preview_bucket_secs,
        ),
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
///
/// Symlinks are not followed: a file is indexed under the name it was
/// reported with.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecodedFile, JsonCodec, OutputFormat};
    use crate::core::temporal::{TimeWindow, Timestamp};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// JSON codec whose decode takes a while and records overlapping calls
    #[derive(Default)]
    struct SlowCodec {
        inner: JsonCodec,
        active: AtomicUsize,
        peak: AtomicUsize,
        decodes: AtomicUsize,
    }

    impl WaveformCodec for SlowCodec {
        fn name(&self) -> &str {
            "slow-json"
        }

        fn decode(&self, path: &Path) -> Result<DecodedFile> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.decodes.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            let decoded = self.inner.decode(path);
            self.active.fetch_sub(1, Ordering::SeqCst);
            decoded
        }

        fn encode(&self, trace: &Trace, format: OutputFormat, out: &mut Vec<u8>) -> Result<()> {
            self.inner.encode(trace, format, out)
        }
    }

    fn trace(channel: &str, start: &str, rate: f64, n: usize) -> Trace {
        Trace {
            network: "ta".into(),
            station: "a25a".into(),
            location: "".into(),
            channel: channel.into(),
            start: Timestamp::parse(start).unwrap(),
            sampling_rate: rate,
            calibration: Some(2.5),
            quality: Some("D".into()),
            samples: (0..n).map(|i| (i % 7) as f64).collect(),
        }
    }

    fn ingestor() -> Ingestor {
        Ingestor::new(Arc::new(SegmentIndex::new()), Arc::new(JsonCodec::new()), 60)
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/data/./x/../a.json")).unwrap(),
            PathBuf::from("/data/a.json")
        );
        assert!(normalize_path(Path::new("rel/a.json")).unwrap().is_absolute());
    }

    #[test]
    fn test_build_segment() {
        let segment = build_segment(&trace("bhz", "2010-03-25T00:00:00", 40.0, 1201), 60);
        assert_eq!(segment.identity.to_string(), "TA.A25A..BHZ");
        assert_eq!(segment.sample_count, 1201);
        assert_eq!(segment.end, Timestamp::parse("2010-03-25T00:00:30").unwrap());
        assert_eq!(segment.calibration, 2.5);
        assert_eq!(segment.quality.as_deref(), Some("D"));
        let preview = segment.preview.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview.range().map(|r| (r.min, r.max)), Some((0.0, 6.0)));
    }

    #[tokio::test]
    async fn test_ingest_then_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ta.json");
        JsonCodec::new()
            .write_container(
                &path,
                &[
                    trace("BHZ", "2010-03-25T00:00:00", 1.0, 10),
                    trace("BHZ", "2010-03-25T00:01:00", 1.0, 10),
                    trace("BHN", "2010-03-25T00:00:00", 1.0, 10),
                ],
            )
            .unwrap();

        let ingestor = ingestor();
        let record = match ingestor.ingest(&path).await.unwrap() {
            IngestOutcome::Indexed(record) => record,
            other => panic!("expected indexed, got {other:?}"),
        };
        assert_eq!(record.format, "JSON");
        assert_eq!(record.gap_count, 1);
        assert_eq!(record.overlap_count, 0);

        let snapshot = ingestor.index().snapshot();
        let positions: Vec<u32> = snapshot
            .file(record.id)
            .unwrap()
            .segments
            .iter()
            .map(|s| s.position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);

        assert_eq!(
            ingestor.ingest(&path).await.unwrap(),
            IngestOutcome::Unchanged(record.id)
        );
        assert_eq!(ingestor.index().stats().generation, 1);
        assert_eq!(ingestor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_reingest_replaces_segments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ta.json");
        let codec = JsonCodec::new();
        codec
            .write_container(&path, &[trace("BHZ", "2010-03-25T00:00:00", 1.0, 10)])
            .unwrap();
        let ingestor = ingestor();
        ingestor.ingest(&path).await.unwrap();

        codec
            .write_container(
                &path,
                &[
                    trace("BHE", "2011-01-01T00:00:00", 1.0, 5),
                    trace("BHE", "2011-01-01T00:00:10", 1.0, 5),
                ],
            )
            .unwrap();
        // guarantee a different stat triple even on coarse clocks
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b" "))
            .unwrap();
        assert!(matches!(ingestor.ingest(&path).await.unwrap(), IngestOutcome::Indexed(_)));

        let snapshot = ingestor.index().snapshot();
        let all: Vec<String> = snapshot
            .segments_overlapping(&TimeWindow::unbounded())
            .map(|s| s.identity.to_string())
            .collect();
        assert_eq!(all, vec!["TA.A25A..BHE", "TA.A25A..BHE"]);
        assert_eq!(snapshot.stats().files, 1);
    }

    #[tokio::test]
    async fn test_decode_failures() {
        let dir = TempDir::new().unwrap();
        let ingestor = ingestor();

        let garbage = dir.path().join("garbage.bin");
        std::fs::write(&garbage, b"definitely not a waveform").unwrap();
        assert!(matches!(
            ingestor.ingest(&garbage).await.unwrap_err(),
            Error::Decode { .. }
        ));

        let empty = dir.path().join("empty.json");
        JsonCodec::new().write_container(&empty, &[]).unwrap();
        let err = ingestor.ingest(&empty).await.unwrap_err();
        assert!(matches!(err, Error::EmptyContainer(_)));
        assert!(err.to_string().contains("valid waveform file but contains no actual data"));

        assert!(matches!(
            ingestor.ingest(dir.path().join("missing.json")).await.unwrap_err(),
            Error::Io(_)
        ));
        assert_eq!(ingestor.index().stats().files, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingestion_of_one_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ta.json");
        JsonCodec::new()
            .write_container(&path, &[trace("BHZ", "2010-03-25T00:00:00", 1.0, 10)])
            .unwrap();
        let ingestor = Arc::new(ingestor());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let ingestor = ingestor.clone();
                let path = path.clone();
                tokio::spawn(async move { ingestor.ingest(&path).await })
            })
            .collect();
        let mut indexed = 0;
        for task in tasks {
            if let IngestOutcome::Indexed(_) = task.await.unwrap().unwrap() {
                indexed += 1;
            }
        }

        assert_eq!(indexed, 1);
        assert_eq!(ingestor.index().stats().segments, 1);
        assert_eq!(ingestor.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_ingest_keeps_path_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ta.json");
        JsonCodec::new()
            .write_container(&path, &[trace("BHZ", "2010-03-25T00:00:00", 1.0, 10)])
            .unwrap();
        let codec = Arc::new(SlowCodec::default());
        let ingestor = Ingestor::new(Arc::new(SegmentIndex::new()), codec.clone(), 60);

        // give up on the first ingest while its decode is still running
        let abandoned = tokio::time::timeout(Duration::from_millis(50), ingestor.ingest(&path)).await;
        assert!(abandoned.is_err());
        assert_eq!(ingestor.in_flight(), 1);

        let outcome = ingestor.ingest(&path).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Unchanged(_)));
        assert_eq!(codec.decodes.load(Ordering::SeqCst), 1);
        assert_eq!(codec.peak.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.in_flight(), 0);
    }
}
