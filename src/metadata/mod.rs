//! Binary metadata reading for compiled .NET modules.
//!
//! Opens a compiled module image, sniffs its format from header bytes and
//! extracts the set of externally declared members it references together
//! with the assemblies that plausibly declare them. No code in the module is
//! ever executed.

mod cursor;
pub mod error;
pub mod pe;
pub mod reader;
pub mod signature;
pub mod streams;
pub mod tables;

pub use error::MetadataError;
pub use pe::BinaryFormat;
pub use reader::{MemberReference, MetadataReader, ModuleMetadata};
