//! JSON trace container codec.
//!
//! A container is one JSON document:
//!
//! ```json
//! {"format": "JSON", "traces": [{"network": "TA", "station": "A25A",
//!   "location": "", "channel": "BHZ", "starttime": "2010-03-25T00:00:00Z",
//!   "sampling_rate": 40.0, "calib": 1.0, "quality": "D", "data": [1, 2, 3]}]}
//! ```
//!
//! Responses in [`OutputFormat::Json`] are newline-delimited trace objects,
//! one line per segment, so they can be written out incrementally.

use crate::codec::{DecodedFile, OutputFormat, Trace, WaveformCodec};
use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const FORMAT_TAG: &str = "JSON";

#[derive(Debug, Serialize, Deserialize)]
struct ContainerDocument {
    #[serde(default)]
    format: Option<String>,
    traces: Vec<TraceDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TraceDocument {
    #[serde(default)]
    network: String,
    station: String,
    #[serde(default)]
    location: String,
    channel: String,
    starttime: String,
    sampling_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    calib: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quality: Option<String>,
    data: Vec<f64>,
}

impl TraceDocument {
    fn from_trace(trace: &Trace) -> Self {
        Self {
            network: trace.network.clone(),
            station: trace.station.clone(),
            location: trace.location.clone(),
            channel: trace.channel.clone(),
            starttime: trace.start.to_string(),
            sampling_rate: trace.sampling_rate,
            calib: trace.calibration,
            quality: trace.quality.clone(),
            data: trace.samples.clone(),
        }
    }

    fn into_trace(self) -> std::result::Result<Trace, String> {
        let start = Timestamp::parse(&self.starttime)
            .ok_or_else(|| format!("unparseable starttime '{}'", self.starttime))?;
        if !(self.sampling_rate > 0.0) || !self.sampling_rate.is_finite() {
            return Err(format!("invalid sampling rate {}", self.sampling_rate));
        }
        Ok(Trace {
            network: self.network,
            station: self.station,
            location: self.location,
            channel: self.channel,
            start,
            sampling_rate: self.sampling_rate,
            calibration: self.calib,
            quality: self.quality,
            samples: self.data,
        })
    }
}

/// Codec for JSON trace containers
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Write `traces` as a container at `path`
    pub fn write_container(&self, path: &Path, traces: &[Trace]) -> Result<()> {
        let document = ContainerDocument {
            format: Some(FORMAT_TAG.to_string()),
            traces: traces.iter().map(TraceDocument::from_trace).collect(),
        };
        std::fs::write(path, serde_json::to_vec(&document)?)?;
        Ok(())
    }

    /// Parse one line of a JSON response back into a trace
    pub fn parse_response_line(line: &str) -> Result<Trace> {
        let document: TraceDocument = serde_json::from_str(line)?;
        document.into_trace().map_err(Error::Serialization)
    }
}

impl WaveformCodec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn decode(&self, path: &Path) -> Result<DecodedFile> {
        let raw = std::fs::read(path)?;
        let document: ContainerDocument =
            serde_json::from_slice(&raw).map_err(|e| Error::decode(path, e))?;

        let format = document.format.unwrap_or_else(|| FORMAT_TAG.to_string());
        let traces = document
            .traces
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                t.into_trace()
                    .map_err(|reason| Error::decode(path, format!("trace {}: {}", i, reason)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DecodedFile { format, traces })
    }

    fn encode(&self, trace: &Trace, format: OutputFormat, out: &mut Vec<u8>) -> Result<()> {
        match format {
            OutputFormat::Json => {
                serde_json::to_writer(&mut *out, &TraceDocument::from_trace(trace))?;
                out.push(b'\n');
                Ok(())
            }
            other => Err(Error::Codec(format!(
                "the {} codec cannot encode '{}'",
                self.name(),
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_trace() -> Trace {
        Trace {
            network: "".into(),
            station: "RJOB".into(),
            location: "".into(),
            channel: "Z".into(),
            start: Timestamp::parse("2005-10-06T07:21:59.850000").unwrap(),
            sampling_rate: 200.0,
            calibration: Some(1.0),
            quality: Some("D".into()),
            samples: vec![1.0, 2.0, 3.0],
        }
    }

    #[test]
    fn test_container_decodes_what_was_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rjob.json");
        let codec = JsonCodec::new();
        codec.write_container(&path, &[sample_trace()]).unwrap();

        let decoded = codec.decode(&path).unwrap();
        assert_eq!(decoded.format, "JSON");
        assert_eq!(decoded.traces, vec![sample_trace()]);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"\x00\x01not a waveform").unwrap();

        let err = JsonCodec::new().decode(&path).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn test_bad_trace_header_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            br#"{"traces":[{"station":"X","channel":"Z","starttime":"soon","sampling_rate":1,"data":[]}]}"#,
        )
        .unwrap();

        let err = JsonCodec::new().decode(&path).unwrap_err();
        assert!(err.to_string().contains("unparseable starttime"));
    }

    #[test]
    fn test_json_response_lines() {
        let codec = JsonCodec::new();
        let mut out = Vec::new();
        codec.encode(&sample_trace(), OutputFormat::Json, &mut out).unwrap();
        assert_eq!(out.last(), Some(&b'\n'));

        let line = std::str::from_utf8(&out).unwrap().trim_end();
        assert_eq!(JsonCodec::parse_response_line(line).unwrap(), sample_trace());
    }

    #[test]
    fn test_miniseed_output_is_unsupported() {
        let mut out = Vec::new();
        let err = JsonCodec::new()
            .encode(&sample_trace(), OutputFormat::MiniSeed, &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert!(out.is_empty());
    }
}
