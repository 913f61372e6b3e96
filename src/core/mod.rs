//! Core data types and models

pub mod identity;
pub mod preview;
pub mod segment;
pub mod temporal;

pub use identity::*;
pub use preview::*;
pub use segment::*;
pub use temporal::*;
