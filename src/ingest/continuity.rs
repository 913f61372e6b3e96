//! Gap and overlap counting across the segments of one file

use crate::core::identity::StreamIdentity;
use crate::core::segment::Segment;
use crate::core::temporal::Timestamp;
use std::collections::BTreeMap;

/// Gap and overlap counts of one file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Continuity {
    pub gaps: u32,
    pub overlaps: u32,
}

/// Count gaps and overlaps between consecutive segments of the same stream.
///
/// Segments are grouped by identity and ordered by start. For each segment
/// the distance `delta = start - previous_end` is taken against the latest
/// end seen so far in its stream. `delta < 0` is an overlap. A gap needs at
/// least one missing sample, that is `round(delta * rate) >= 2`; anything
/// closer counts as contiguous so that sub-sample timing jitter is ignored.
pub fn assess(segments: &[Segment]) -> Continuity {
    let mut streams: BTreeMap<&StreamIdentity, Vec<&Segment>> = BTreeMap::new();
    for segment in segments {
        streams.entry(&segment.identity).or_default().push(segment);
    }

    let mut continuity = Continuity::default();
    for runs in streams.values_mut() {
        runs.sort_by_key(|s| (s.start, s.end));
        let mut latest_end: Option<Timestamp> = None;
        for run in runs.iter() {
            if let Some(end) = latest_end {
                let delta = run.start.seconds_since(end);
                if delta < 0.0 {
                    continuity.overlaps += 1;
                } else if (delta * run.sampling_rate).round() >= 2.0 {
                    continuity.gaps += 1;
                }
            }
            latest_end = Some(latest_end.map_or(run.end, |end| end.max(run.end)));
        }
    }
    continuity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::segment::FileId;

    fn run(channel: &str, start_ms: i64, samples: u64, rate: f64) -> Segment {
        let start = Timestamp::from_millis(start_ms);
        Segment {
            identity: StreamIdentity::new("TA", "A25A", "", channel),
            start,
            end: Segment::end_time(start, samples, rate),
            sampling_rate: rate,
            sample_count: samples,
            calibration: 1.0,
            quality: None,
            file: FileId(0),
            position: 0,
            preview: None,
        }
    }

    #[test]
    fn test_contiguous_runs_have_no_gap() {
        // 10 samples at 1 Hz end at 9 s; the next run starts one period later
        let segments = vec![run("BHZ", 0, 10, 1.0), run("BHZ", 10_000, 10, 1.0)];
        assert_eq!(assess(&segments), Continuity::default());
    }

    #[test]
    fn test_gap_needs_a_missing_sample() {
        let jitter = vec![run("BHZ", 0, 10, 1.0), run("BHZ", 10_400, 10, 1.0)];
        assert_eq!(assess(&jitter).gaps, 0);

        let one_missing = vec![run("BHZ", 0, 10, 1.0), run("BHZ", 11_000, 10, 1.0)];
        assert_eq!(assess(&one_missing), Continuity { gaps: 1, overlaps: 0 });
    }

    #[test]
    fn test_overlap() {
        let segments = vec![run("BHZ", 5_000, 10, 1.0), run("BHZ", 0, 10, 1.0)];
        assert_eq!(assess(&segments), Continuity { gaps: 0, overlaps: 1 });
    }

    #[test]
    fn test_streams_are_assessed_separately() {
        let segments = vec![
            run("BHZ", 0, 10, 1.0),
            run("BHN", 100_000, 10, 1.0),
            run("BHZ", 50_000, 10, 1.0),
            run("BHN", 105_000, 10, 1.0),
        ];
        assert_eq!(assess(&segments), Continuity { gaps: 1, overlaps: 1 });
    }

    #[test]
    fn test_contained_run_then_gap_is_measured_from_latest_end() {
        let segments = vec![
            run("BHZ", 0, 100, 1.0),
            run("BHZ", 10_000, 5, 1.0),
            run("BHZ", 100_000, 10, 1.0),
        ];
        assert_eq!(assess(&segments), Continuity { gaps: 0, overlaps: 1 });
    }
}
