//! Catalog persistence

pub mod catalog;
pub mod catalog_file;

pub use catalog::{CatalogSnapshot, CatalogStore, FileCatalog, InMemoryCatalog};
pub use catalog_file::{read_catalog, write_catalog, CatalogHeader};
