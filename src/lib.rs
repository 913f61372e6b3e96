//! Waveform-DB: waveform file indexer and query engine
//!
//! Indexes the contiguous sample runs ("segments") found in waveform
//! container files and answers time-window queries with FDSN style stream
//! patterns, honoring per network/station access restrictions.
//!
//! # Core Concepts
//!
//! - **Segments**: contiguous runs of samples of one stream inside one file
//! - **Segment index**: copy-on-write snapshots ordered by stream and start time
//! - **Restrictions**: network/station pairs visible only to named users
//! - **Responses**: resolved segments streamed one at a time through a codec
//!
//! # Example
//!
//! ```no_run
//! use waveform_db::prelude::*;
//!
//! # async fn example() -> waveform_db::error::Result<()> {
//! let db = WaveformDB::in_memory()?;
//! db.index_path("/data/waveforms", false).await?;
//!
//! let window = TimeWindow::new(
//!     Timestamp::parse("2010-03-25T00:00:00").unwrap(),
//!     Timestamp::parse("2010-03-25T00:01:00").unwrap(),
//! )
//! .unwrap();
//! let spec = QuerySpec::new(window).with_selectors(Selectors::all().with_channel("BH?,-BHZ"));
//! for resolved in db.resolve(&spec).iter() {
//!     println!("{} in {}", resolved.segment.identity, resolved.path.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod api;
pub mod cli;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod index;
pub mod ingest;
pub mod query;
pub mod storage;

/// Main database type
pub mod db;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::access::{Requester, Restriction};
    pub use crate::codec::{JsonCodec, OutputFormat, WaveformCodec};
    pub use crate::core::*;
    pub use crate::db::WaveformDB;
    pub use crate::error::{Error, Result};
    pub use crate::query::{QuerySpec, Resolution, Selectors};
}
