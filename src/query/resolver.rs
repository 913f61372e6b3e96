//! Query resolution: selectors, time window and restrictions against one
//! index snapshot.

use crate::access::RestrictionTable;
use crate::core::identity::StreamIdentity;
use crate::core::segment::{Segment, SegmentKey};
use crate::core::temporal::TimeWindow;
use crate::index::IndexSnapshot;
use crate::query::params::QuerySpec;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Why a resolution came out empty.
///
/// Both reasons look the same to the caller; the distinction only feeds
/// logs so that restricted streams are not revealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataReason {
    /// Nothing in the index matched the selectors and window
    NoMatch,
    /// Matching data exists but the requester may not read any of it
    Restricted,
}

/// A segment selected by a query, with the path to read its samples from
#[derive(Debug, Clone)]
pub struct ResolvedSegment {
    pub segment: Arc<Segment>,
    pub path: PathBuf,
}

/// Resolves queries against a fixed index snapshot and restriction table
#[derive(Debug, Clone)]
pub struct QueryResolver {
    snapshot: Arc<IndexSnapshot>,
    restrictions: Arc<RestrictionTable>,
}

impl QueryResolver {
    pub fn new(snapshot: Arc<IndexSnapshot>, restrictions: Arc<RestrictionTable>) -> Self {
        Self {
            snapshot,
            restrictions,
        }
    }

    /// Select the streams a query reads from.
    ///
    /// Only identities are decided here; segments are looked up lazily by
    /// [`Resolution::iter`]. Candidate identities are every stream in the
    /// snapshot, so this step is linear in the number of streams and
    /// logarithmic in the number of segments per stream.
    #[instrument(skip_all, fields(window = %spec.window, requester = %spec.requester))]
    pub fn resolve(&self, spec: &QuerySpec) -> Resolution {
        let mut streams = Vec::new();
        let mut denied = Vec::new();

        for (identity, timeline) in self.snapshot.streams() {
            if !spec.selectors.matches(identity) {
                continue;
            }
            if timeline.next_overlapping(&spec.window, None).is_none() {
                continue;
            }
            if self.restrictions.is_allowed(identity, &spec.requester) {
                streams.push(identity.clone());
            } else {
                denied.push(identity.clone());
            }
        }

        if !denied.is_empty() {
            warn!(
                denied = denied.len(),
                first = %denied[0],
                "restricted streams dropped from query"
            );
        }
        debug!(streams = streams.len(), "query resolved");

        Resolution {
            snapshot: self.snapshot.clone(),
            window: spec.window,
            streams,
            denied,
        }
    }
}

/// Outcome of resolving one query.
///
/// Holds the snapshot it was resolved against, so iterating it again yields
/// the same segments in the same order no matter what was written since.
#[derive(Debug, Clone)]
pub struct Resolution {
    snapshot: Arc<IndexSnapshot>,
    window: TimeWindow,
    streams: Vec<StreamIdentity>,
    denied: Vec<StreamIdentity>,
}

impl Resolution {
    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    /// Streams contributing at least one segment, in identity order
    pub fn streams(&self) -> &[StreamIdentity] {
        &self.streams
    }

    /// Matching streams the requester may not read
    pub fn denied(&self) -> &[StreamIdentity] {
        &self.denied
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Whether any selected segment has a sample instant inside the window.
    ///
    /// A window can fall between two samples of every segment it overlaps;
    /// such a resolution is not empty yet streams nothing.
    pub fn has_samples(&self) -> bool {
        self.iter()
            .any(|r| r.segment.samples_within(&self.window).is_some())
    }

    pub fn empty_reason(&self) -> Option<NoDataReason> {
        match (self.streams.is_empty(), self.denied.is_empty()) {
            (false, _) => None,
            (true, true) => Some(NoDataReason::NoMatch),
            (true, false) => Some(NoDataReason::Restricted),
        }
    }

    /// Lazy cursor over the selected segments in
    /// (network, station, location, channel, start, position) order.
    pub fn iter(&self) -> Cursor<'_> {
        Cursor {
            resolution: self,
            stream: 0,
            after: None,
        }
    }
}

impl<'a> IntoIterator for &'a Resolution {
    type Item = ResolvedSegment;
    type IntoIter = Cursor<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Position within a [`Resolution`]: the current stream and the key of the
/// last segment handed out.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    resolution: &'a Resolution,
    stream: usize,
    after: Option<SegmentKey>,
}

impl Iterator for Cursor<'_> {
    type Item = ResolvedSegment;

    fn next(&mut self) -> Option<ResolvedSegment> {
        let snapshot = &self.resolution.snapshot;
        loop {
            let identity = self.resolution.streams.get(self.stream)?;
            let next = snapshot
                .timeline(identity)
                .and_then(|t| t.next_overlapping(&self.resolution.window, self.after.as_ref()));

            let Some(segment) = next else {
                self.stream += 1;
                self.after = None;
                continue;
            };
            self.after = Some(segment.key());

            match snapshot.file(segment.file) {
                Some(file) => {
                    return Some(ResolvedSegment {
                        segment: segment.clone(),
                        path: file.record.path.clone(),
                    })
                }
                None => warn!(file = %segment.file, "segment without owning file skipped"),
            }
        }
    }
}
