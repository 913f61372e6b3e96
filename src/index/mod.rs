//! Indexing of segments by stream identity and time

pub mod segment_index;
pub mod timeline;

pub use segment_index::*;
pub use timeline::*;
