//! Waveform codec seam.
//!
//! Decoding raw containers into typed sample arrays and encoding them back
//! is owned by a codec collaborator. The index only needs the operations in
//! [`WaveformCodec`]; [`json::JsonCodec`] is a self-contained implementation
//! used by the CLI and the tests.

pub mod json;

pub use json::JsonCodec;

use crate::core::identity::StreamIdentity;
use crate::core::segment::{sample_range, Segment};
use crate::core::temporal::{TimeWindow, Timestamp};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Output formats a response can be encoded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    MiniSeed,
    Json,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::MiniSeed, OutputFormat::Json];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "mseed" | "miniseed" => Some(OutputFormat::MiniSeed),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::MiniSeed => "mseed",
            OutputFormat::Json => "json",
        }
    }

    /// Content tag announced for a successful response
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::MiniSeed => "application/vnd.fdsn.mseed",
            OutputFormat::Json => "application/x-ndjson",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::MiniSeed
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded run of samples as delivered by a codec
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: Timestamp,
    pub sampling_rate: f64,
    pub calibration: Option<f64>,
    pub quality: Option<String>,
    pub samples: Vec<f64>,
}

impl Trace {
    /// Normalized identity of this trace
    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity::new(&self.network, &self.station, &self.location, &self.channel)
    }

    /// Time of the last sample
    pub fn end(&self) -> Timestamp {
        Segment::end_time(self.start, self.samples.len() as u64, self.sampling_rate)
    }

    /// Samples falling inside the closed `window`, or `None` if there are none
    pub fn slice(&self, window: &TimeWindow) -> Option<Trace> {
        let (from, to) = sample_range(
            self.start,
            self.sampling_rate,
            self.samples.len() as u64,
            window,
        )?;
        let (from, to) = (from as usize, to as usize);
        Some(Trace {
            start: self.start.add_secs_f64(from as f64 / self.sampling_rate),
            samples: self.samples[from..=to].to_vec(),
            ..self.clone_header()
        })
    }

    fn clone_header(&self) -> Trace {
        Trace {
            network: self.network.clone(),
            station: self.station.clone(),
            location: self.location.clone(),
            channel: self.channel.clone(),
            start: self.start,
            sampling_rate: self.sampling_rate,
            calibration: self.calibration,
            quality: self.quality.clone(),
            samples: Vec::new(),
        }
    }
}

/// Result of decoding one container
#[derive(Debug, Clone)]
pub struct DecodedFile {
    /// Format tag of the container
    pub format: String,
    pub traces: Vec<Trace>,
}

/// Codec collaborator.
///
/// Implementations must be cheap to share; the ingestion workers and the
/// response streamer call into them from blocking worker threads.
pub trait WaveformCodec: Send + Sync {
    /// Short codec name used in logs
    fn name(&self) -> &str;

    /// Decode every trace of the container at `path`.
    ///
    /// Unrecognized or corrupt input is an [`Error::Decode`].
    fn decode(&self, path: &Path) -> Result<DecodedFile>;

    /// Encode `trace` in `format`, appending to `out`
    fn encode(&self, trace: &Trace, format: OutputFormat, out: &mut Vec<u8>) -> Result<()>;

    /// Re-read the samples of an indexed segment, trimmed to `window`.
    ///
    /// The default implementation decodes the whole container and picks the
    /// trace at the segment's recorded position.
    fn read_segment(
        &self,
        path: &Path,
        segment: &Segment,
        window: &TimeWindow,
    ) -> Result<Option<Trace>> {
        let decoded = self.decode(path)?;
        let trace = decoded
            .traces
            .into_iter()
            .nth(segment.position as usize)
            .ok_or_else(|| {
                Error::Codec(format!(
                    "'{}' no longer holds a trace at position {}",
                    path.display(),
                    segment.position
                ))
            })?;
        if trace.identity() != segment.identity || trace.start != segment.start {
            return Err(Error::Codec(format!(
                "'{}' changed since it was indexed ({} expected at position {})",
                path.display(),
                segment.identity,
                segment.position
            )));
        }
        Ok(trace.slice(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: Timestamp, rate: f64, n: usize) -> Trace {
        Trace {
            network: "ta".into(),
            station: "a25a".into(),
            location: "".into(),
            channel: "bhz".into(),
            start,
            sampling_rate: rate,
            calibration: None,
            quality: None,
            samples: (0..n).map(|i| i as f64).collect(),
        }
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::parse("MSEED"), Some(OutputFormat::MiniSeed));
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("xml"), None);
        assert_eq!(OutputFormat::default().content_type(), "application/vnd.fdsn.mseed");
    }

    #[test]
    fn test_trace_identity_and_end() {
        let trace = ramp(Timestamp::from_secs(0), 40.0, 1201);
        assert_eq!(trace.identity().to_string(), "TA.A25A..BHZ");
        assert_eq!(trace.end(), Timestamp::from_secs(30));
    }

    #[test]
    fn test_slice_trims_partial_overlap() {
        let trace = ramp(Timestamp::from_secs(10), 1.0, 11); // samples at 10..=20 s
        let window =
            TimeWindow::new(Timestamp::from_millis(12_500), Timestamp::from_secs(30)).unwrap();
        let cut = trace.slice(&window).unwrap();
        assert_eq!(cut.start, Timestamp::from_secs(13));
        assert_eq!(cut.samples, vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        assert_eq!(cut.channel, "bhz");
    }

    #[test]
    fn test_slice_keeps_boundary_samples() {
        let trace = ramp(Timestamp::from_secs(10), 1.0, 11);
        let window = TimeWindow::new(Timestamp::from_secs(10), Timestamp::from_secs(20)).unwrap();
        assert_eq!(trace.slice(&window).unwrap().samples.len(), 11);

        let point = TimeWindow::new(Timestamp::from_secs(20), Timestamp::from_secs(20)).unwrap();
        assert_eq!(trace.slice(&point).unwrap().samples, vec![10.0]);
    }

    #[test]
    fn test_slice_between_samples_is_empty() {
        let trace = ramp(Timestamp::from_secs(10), 1.0, 11);
        let window =
            TimeWindow::new(Timestamp::from_millis(12_200), Timestamp::from_millis(12_800)).unwrap();
        assert!(trace.slice(&window).is_none());
    }
}
