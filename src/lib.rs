//! Portcheck - Static portability analyzer for compiled .NET assemblies
//!
//! This crate provides functionality for discovering the external API surface
//! a batch of compiled assemblies depends on and cross-referencing it against
//! a versioned platform catalog to produce per-target support verdicts.

pub mod analysis;
pub mod catalog;
pub mod finder;
pub mod metadata;
pub mod types;

pub use analysis::{analyze, AnalyzeResponse, ReportingResult};
pub use catalog::Catalog;
pub use finder::{DependencyFinder, DependencyInfo};
pub use types::*;
