//! Platform catalog: the versioned API-to-platform support database.

#[allow(clippy::module_inception)]
pub mod catalog;
pub mod error;
pub mod source;
pub mod store;

pub use catalog::{Catalog, CatalogEntry};
pub use error::CatalogError;
pub use source::{CatalogSlot, CatalogSource, FileCatalogSource};
pub use store::{ApiRecord, BreakingChangeRecord, CatalogDocument, TargetSupport};
