//! Response streaming: materialize resolved segments through the codec and
//! write them to a sink in order.

use crate::codec::{OutputFormat, WaveformCodec};
use crate::core::temporal::TimeWindow;
use crate::error::{Error, Result};
use crate::query::resolver::{ResolvedSegment, Resolution};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// What a finished stream wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Segments encoded and written
    pub segments: usize,
    /// Segments whose trimmed range held no sample
    pub skipped: usize,
    pub bytes: u64,
}

/// Writes a [`Resolution`] to a byte sink one segment at a time
#[derive(Clone)]
pub struct ResponseStreamer {
    codec: Arc<dyn WaveformCodec>,
}

impl std::fmt::Debug for ResponseStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStreamer")
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl ResponseStreamer {
    pub fn new(codec: Arc<dyn WaveformCodec>) -> Self {
        Self { codec }
    }

    /// Stream every segment of `resolution`, encoded in `format`.
    ///
    /// Each segment is read, trimmed to the query window and encoded on a
    /// blocking worker, then written out before the next one is read, so at
    /// most one encoded segment is held in memory. Any read, encode or write
    /// failure aborts the response with [`Error::Streaming`]; no later
    /// segment is attempted. Cancelling `cancel` aborts with
    /// [`Error::Cancelled`]. An abandoned worker finishes its one segment and
    /// drops its buffers and file handles on its own.
    #[instrument(skip_all, fields(format = %format, streams = resolution.streams().len()))]
    pub async fn stream<W>(
        &self,
        resolution: &Resolution,
        format: OutputFormat,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<StreamSummary>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let window = *resolution.window();
        let mut summary = StreamSummary::default();

        for resolved in resolution.iter() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let label = format!(
                "{} @ {} in '{}'",
                resolved.segment.identity,
                resolved.segment.start,
                resolved.path.display()
            );

            let codec = self.codec.clone();
            let worker = tokio::task::spawn_blocking(move || {
                encode_segment(codec.as_ref(), &resolved, &window, format)
            });
            let encoded = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                joined = worker => match joined {
                    Ok(Ok(encoded)) => encoded,
                    Ok(Err(e)) => return Err(Error::Streaming(format!("{}: {}", label, e))),
                    Err(e) => return Err(Error::Streaming(format!("{}: {}", label, e))),
                },
            };

            let Some(bytes) = encoded else {
                debug!(segment = %label, "no samples inside window");
                summary.skipped += 1;
                continue;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                written = sink.write_all(&bytes) => written
                    .map_err(|e| Error::Streaming(format!("writing {}: {}", label, e)))?,
            }
            debug!(segment = %label, bytes = bytes.len(), "segment written");
            summary.segments += 1;
            summary.bytes += bytes.len() as u64;
        }

        sink.flush()
            .await
            .map_err(|e| Error::Streaming(format!("flushing response: {}", e)))?;
        info!(
            segments = summary.segments,
            skipped = summary.skipped,
            bytes = summary.bytes,
            "response streamed"
        );
        Ok(summary)
    }
}

fn encode_segment(
    codec: &dyn WaveformCodec,
    resolved: &ResolvedSegment,
    window: &TimeWindow,
    format: OutputFormat,
) -> Result<Option<Vec<u8>>> {
    let Some(trace) = codec.read_segment(&resolved.path, &resolved.segment, window)? else {
        return Ok(None);
    };
    let mut out = Vec::new();
    codec.encode(&trace, format, &mut out)?;
    Ok(Some(out))
}
