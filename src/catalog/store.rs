//! On-disk catalog blob layout.
//!
//! The catalog ships as one versioned JSON document, optionally gzip
//! compressed. Compression is sniffed from the magic bytes, never from the
//! file name.

use std::io::Read;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::catalog::error::{CatalogError, Result};
use crate::types::{FrameworkVersion, Target};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// A documented incompatibility introduced at a specific platform version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChangeRecord {
    pub id: String,
    /// Doc id of the affected API.
    pub doc_id: String,
    /// Platform family the change applies to.
    pub family: String,
    /// Version the change first appears in.
    pub introduced: FrameworkVersion,
    pub description: String,
    pub remediation: String,
    /// `true` for source-breaking (retargeting) changes, `false` for
    /// source-compatible behavior changes.
    #[serde(default)]
    pub retargeting: bool,
}

impl BreakingChangeRecord {
    /// Whether a platform at `target`'s version is affected.
    pub fn applies_to(&self, target: &Target) -> bool {
        self.family.eq_ignore_ascii_case(&target.family) && self.introduced <= target.version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSupport {
    pub target: Target,
    pub supported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRecord {
    pub doc_id: String,
    #[serde(default)]
    pub supported: Vec<TargetSupport>,
    #[serde(default)]
    pub breaking_changes: Vec<BreakingChangeRecord>,
}

/// The serialized catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub version: String,
    pub built: DateTime<Utc>,
    /// Assemblies provided by the platforms themselves; references to these
    /// are never reported as unresolved.
    #[serde(default)]
    pub framework_assemblies: Vec<String>,
    pub apis: Vec<ApiRecord>,
}

/// Decode a catalog blob, transparently handling gzip compression.
pub fn decode(bytes: &[u8]) -> Result<CatalogDocument> {
    let payload: Vec<u8> = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| CatalogError::MalformedCatalog {
                reason: format!("gzip decode failed: {e}"),
            })?;
        decompressed
    } else {
        bytes.to_vec()
    };

    serde_json::from_slice(&payload).map_err(|e| CatalogError::MalformedCatalog {
        reason: e.to_string(),
    })
}

/// Encode a catalog document, optionally gzip compressed.
pub fn encode(document: &CatalogDocument, compress: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(document).map_err(|e| CatalogError::MalformedCatalog {
        reason: e.to_string(),
    })?;
    if !compress {
        return Ok(json);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &json).map_err(|e| {
        CatalogError::MalformedCatalog {
            reason: format!("gzip encode failed: {e}"),
        }
    })?;
    encoder.finish().map_err(|e| CatalogError::MalformedCatalog {
        reason: format!("gzip encode failed: {e}"),
    })
}
