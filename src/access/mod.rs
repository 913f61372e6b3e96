//! Access control for restricted network/station pairs

pub mod restriction;

pub use restriction::*;
