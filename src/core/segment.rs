//! Segments and the files that own them

use crate::core::identity::StreamIdentity;
use crate::core::preview::Preview;
use crate::core::temporal::{TimeWindow, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identifier of an indexed file, stable across renames
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// The stat triple used to detect stale index entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
}

impl FileStat {
    pub fn from_metadata(meta: &std::fs::Metadata) -> std::io::Result<Self> {
        let mtime = Timestamp::from(meta.modified()?);
        Ok(Self {
            size: meta.len(),
            mtime,
            ctime: status_change_time(meta).unwrap_or(mtime),
        })
    }
}

#[cfg(unix)]
fn status_change_time(meta: &std::fs::Metadata) -> Option<Timestamp> {
    use std::os::unix::fs::MetadataExt;
    Some(Timestamp::from_nanos(
        meta.ctime() * 1_000_000_000 + meta.ctime_nsec(),
    ))
}

#[cfg(not(unix))]
fn status_change_time(_meta: &std::fs::Metadata) -> Option<Timestamp> {
    None
}

/// One physical waveform container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Absolute, normalized path
    pub path: PathBuf,
    /// Format tag reported by the codec
    pub format: String,
    pub stat: FileStat,
    pub gap_count: u32,
    pub overlap_count: u32,
}

impl FileRecord {
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Directory holding the file
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }
}

/// Ordering key of a segment within its stream.
///
/// Sorts by start time, then by position in the source file, then by file,
/// which makes equal-start segments from different files deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    pub start: Timestamp,
    pub position: u32,
    pub file: FileId,
}

/// One gap-free, single-sampling-rate run of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub identity: StreamIdentity,
    pub start: Timestamp,
    /// Time of the last sample
    pub end: Timestamp,
    pub sampling_rate: f64,
    pub sample_count: u64,
    pub calibration: f64,
    pub quality: Option<String>,
    /// Owning file (back-reference for re-reading samples)
    pub file: FileId,
    /// 0-based position of this segment in its source file
    pub position: u32,
    pub preview: Option<Preview>,
}

impl Segment {
    /// Time of the last sample of a run: `start + (count - 1) / rate`
    pub fn end_time(start: Timestamp, sample_count: u64, sampling_rate: f64) -> Timestamp {
        if sample_count <= 1 || !(sampling_rate > 0.0) {
            return start;
        }
        start.add_secs_f64((sample_count - 1) as f64 / sampling_rate)
    }

    pub fn key(&self) -> SegmentKey {
        SegmentKey {
            start: self.start,
            position: self.position,
            file: self.file,
        }
    }

    /// Sample period in nanoseconds
    pub fn period_nanos(&self) -> f64 {
        1e9 / self.sampling_rate
    }

    /// Closed-interval overlap with `window`
    pub fn overlaps(&self, window: &TimeWindow) -> bool {
        window.overlaps(self.start, self.end)
    }

    pub fn duration_secs(&self) -> f64 {
        self.end.seconds_since(self.start)
    }

    /// Indices of this segment's samples inside `window`, computed from
    /// metadata alone
    pub fn samples_within(&self, window: &TimeWindow) -> Option<(u64, u64)> {
        sample_range(self.start, self.sampling_rate, self.sample_count, window)
    }
}

/// Slack, in fractions of a sample, when mapping times to sample indices
const SAMPLE_EPSILON: f64 = 1e-6;

/// First and last index of the samples of a regular run that fall inside the
/// closed `window`, or `None` when no sample instant does.
pub fn sample_range(
    start: Timestamp,
    sampling_rate: f64,
    sample_count: u64,
    window: &TimeWindow,
) -> Option<(u64, u64)> {
    if sample_count == 0 || !(sampling_rate > 0.0) {
        return None;
    }
    let last_index = (sample_count - 1) as f64;
    let from = (window.start.seconds_since(start) * sampling_rate - SAMPLE_EPSILON)
        .ceil()
        .max(0.0);
    let to = (window.end.seconds_since(start) * sampling_rate + SAMPLE_EPSILON)
        .floor()
        .min(last_index);
    (from <= to).then_some((from as u64, to as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_end_time_of_short_runs() {
        let start = Timestamp::from_secs(100);
        assert_eq!(Segment::end_time(start, 0, 20.0), start);
        assert_eq!(Segment::end_time(start, 1, 20.0), start);
        assert_eq!(Segment::end_time(start, 1201, 40.0), Timestamp::from_secs(130));
    }

    #[test]
    fn test_segment_key_ordering() {
        let a = SegmentKey {
            start: Timestamp::from_secs(1),
            position: 3,
            file: FileId(9),
        };
        let b = SegmentKey {
            start: Timestamp::from_secs(1),
            position: 4,
            file: FileId(1),
        };
        let c = SegmentKey {
            start: Timestamp::from_secs(2),
            position: 0,
            file: FileId(0),
        };
        assert!(a < b && b < c);
    }

    #[test]
    fn test_sample_range() {
        let start = Timestamp::from_secs(100);
        let window = |a: f64, b: f64| {
            TimeWindow::new(start.add_secs_f64(a), start.add_secs_f64(b)).unwrap()
        };
        // 10 Hz, 11 samples spanning one second
        assert_eq!(sample_range(start, 10.0, 11, &window(-5.0, 5.0)), Some((0, 10)));
        assert_eq!(sample_range(start, 10.0, 11, &window(0.2, 0.2)), Some((2, 2)));
        assert_eq!(sample_range(start, 10.0, 11, &window(0.21, 0.29)), None);
        assert_eq!(sample_range(start, 10.0, 11, &window(1.01, 2.0)), None);
        assert_eq!(sample_range(start, 10.0, 0, &window(0.0, 1.0)), None);
    }

    proptest! {
        #[test]
        fn end_matches_count_and_rate(
            start in -1_000_000_000i64..4_000_000_000i64,
            count in 1u64..10_000_000,
            rate in prop_oneof![Just(1.0f64), Just(20.0), Just(40.0), Just(100.0), 0.01f64..1000.0],
        ) {
            let start = Timestamp::from_secs(start);
            let end = Segment::end_time(start, count, rate);
            let expected = (count - 1) as f64 / rate;
            let actual = end.seconds_since(start);
            prop_assert!((actual - expected).abs() <= 1e-6_f64.max(expected * 1e-12));
        }
    }
}
