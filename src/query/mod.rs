//! Query engine: parameters, wildcard selectors, resolution and streaming

pub mod params;
pub mod pattern;
pub mod resolver;
pub mod streamer;

pub use params::{NoDataStatus, QuerySpec};
pub use pattern::{FieldSelector, Pattern, Selectors};
pub use resolver::{NoDataReason, QueryResolver, ResolvedSegment, Resolution};
pub use streamer::{ResponseStreamer, StreamSummary};
