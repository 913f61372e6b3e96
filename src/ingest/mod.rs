//! Ingestion pipeline: files in, segments out

pub mod continuity;
pub mod events;
pub mod pipeline;

pub use continuity::Continuity;
pub use events::{BulkReport, EventKind, EventOutcome, FsEvent};
pub use pipeline::{IngestOutcome, Ingestor};
