//! Per-stream timeline of segments ordered by start time

use crate::core::segment::{FileId, Segment, SegmentKey};
use crate::core::temporal::{TimeWindow, Timestamp};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// All segments of one stream identity, ordered by [`SegmentKey`].
///
/// Overlap lookups walk the start-ordered map from
/// `window.start - max_span` to `window.end`, where `max_span` bounds the
/// length of any segment ever inserted. The cost of a lookup is
/// `O(log n + k + s)`: `k` matching segments plus `s` segments that start
/// inside the look-back span but end before the window. `max_span` only
/// grows, so removals never make a lookup incorrect, only possibly wider.
#[derive(Debug, Clone, Default)]
pub struct StreamTimeline {
    segments: BTreeMap<SegmentKey, Arc<Segment>>,
    max_span_nanos: i64,
}

impl StreamTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a segment, replacing any segment with the same key
    pub fn insert(&mut self, segment: Arc<Segment>) {
        let span = segment
            .end
            .as_nanos()
            .saturating_sub(segment.start.as_nanos());
        self.max_span_nanos = self.max_span_nanos.max(span);
        self.segments.insert(segment.key(), segment);
    }

    pub fn remove(&mut self, key: &SegmentKey) -> Option<Arc<Segment>> {
        self.segments.remove(key)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// All segments in key order
    pub fn segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.values()
    }

    /// Segments intersecting the closed `window`, in key order
    pub fn overlapping<'a>(
        &'a self,
        window: &'a TimeWindow,
    ) -> impl Iterator<Item = &'a Arc<Segment>> + 'a {
        self.range_after(window, None)
            .into_iter()
            .flatten()
            .filter(move |segment| segment.end >= window.start)
    }

    /// First segment intersecting `window` whose key is strictly after `after`.
    ///
    /// Used by cursors that cannot hold a borrow of the timeline between steps.
    pub fn next_overlapping(
        &self,
        window: &TimeWindow,
        after: Option<&SegmentKey>,
    ) -> Option<&Arc<Segment>> {
        self.range_after(window, after)?
            .find(|segment| segment.end >= window.start)
    }

    fn range_after(
        &self,
        window: &TimeWindow,
        after: Option<&SegmentKey>,
    ) -> Option<impl Iterator<Item = &Arc<Segment>>> {
        let lowest = SegmentKey {
            start: window.start.sub_nanos(self.max_span_nanos),
            position: 0,
            file: FileId(0),
        };
        let highest = SegmentKey {
            start: window.end,
            position: u32::MAX,
            file: FileId(u64::MAX),
        };

        let lower = match after {
            Some(key) if *key >= lowest => Bound::Excluded(*key),
            _ => Bound::Included(lowest),
        };
        let empty = match lower {
            Bound::Included(k) => k > highest,
            Bound::Excluded(k) => k >= highest,
            Bound::Unbounded => false,
        };
        if empty {
            return None;
        }
        Some(
            self.segments
                .range((lower, Bound::Included(highest)))
                .map(|(_, segment)| segment),
        )
    }

    /// Earliest start and latest end across the timeline
    pub fn extent(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self.segments.values().next()?.start;
        let last = self.segments.values().map(|s| s.end).max()?;
        Some((first, last))
    }
}
