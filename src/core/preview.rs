//! Coarse min/max previews of a segment's amplitude

use crate::core::temporal::Timestamp;
use serde::{Deserialize, Serialize};

/// Default preview bucket width in seconds
pub const DEFAULT_BUCKET_SECS: u32 = 60;

/// Segments whose preview would need more buckets than this get none
pub const MAX_BUCKETS: usize = 1 << 16;

/// Amplitude range covered by one preview bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewBucket {
    pub min: f64,
    pub max: f64,
}

impl PreviewBucket {
    fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

/// Fixed-stride min/max downsampling of a segment.
///
/// Buckets are aligned to multiples of `bucket_secs` since the epoch so that
/// previews of adjacent segments line up. A bucket without any finite sample
/// is `None`, never a zero-filled range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub bucket_secs: u32,
    /// Start of the first bucket
    pub origin: Timestamp,
    pub buckets: Vec<Option<PreviewBucket>>,
}

impl Preview {
    /// Build a preview for samples starting at `start` spaced `1 / sampling_rate` apart.
    ///
    /// Returns `None` when there is nothing to summarize, or when the samples
    /// span more than [`MAX_BUCKETS`] buckets.
    pub fn build(
        start: Timestamp,
        sampling_rate: f64,
        samples: &[f64],
        bucket_secs: u32,
    ) -> Option<Preview> {
        if samples.is_empty() || bucket_secs == 0 || !(sampling_rate > 0.0) {
            return None;
        }

        let bucket_ns = bucket_secs as i64 * 1_000_000_000;
        let origin = Timestamp::from_nanos(
            start.as_nanos().div_euclid(bucket_ns).checked_mul(bucket_ns)?,
        );
        let lead_ns = (start.as_nanos() - origin.as_nanos()) as f64;
        let period_ns = 1e9 / sampling_rate;

        // offsets are kept in f64 so very slow rates cannot overflow
        let bucket_of = |i: usize| -> f64 {
            ((lead_ns + (i as f64 * period_ns).round()) / bucket_ns as f64).floor()
        };

        let last = bucket_of(samples.len() - 1);
        if !last.is_finite() || last >= MAX_BUCKETS as f64 {
            return None;
        }
        let mut buckets: Vec<Option<PreviewBucket>> = vec![None; last as usize + 1];
        let mut any = false;
        for (i, &value) in samples.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            any = true;
            buckets[(bucket_of(i) as usize).min(last as usize)]
                .get_or_insert(PreviewBucket {
                    min: value,
                    max: value,
                })
                .include(value);
        }

        any.then_some(Preview {
            bucket_secs,
            origin,
            buckets,
        })
    }

    /// Start time of bucket `index`
    pub fn bucket_start(&self, index: usize) -> Timestamp {
        self.origin
            .add_nanos(index as i64 * self.bucket_secs as i64 * 1_000_000_000)
    }

    /// Overall amplitude range across all populated buckets
    pub fn range(&self) -> Option<PreviewBucket> {
        self.buckets.iter().flatten().copied().reduce(|mut acc, b| {
            acc.include(b.min);
            acc.include(b.max);
            acc
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
