//! Immutable in-memory catalog index.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::error::Result;
use crate::catalog::store::{self, BreakingChangeRecord, CatalogDocument};
use crate::types::Target;

/// Per-API support data: ordered `(Target, supported)` pairs plus any
/// recorded breaking changes.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    supported: Vec<(Target, bool)>,
    breaking_changes: Vec<BreakingChangeRecord>,
}

impl CatalogEntry {
    /// Whether the API is supported on `target`.
    ///
    /// The pair with the greatest version at or below the requested version
    /// (same family) decides, which covers both introduced-at and removed-at
    /// support shapes. No family pair means unsupported.
    pub fn is_supported(&self, target: &Target) -> bool {
        let mut verdict = false;
        let mut best = None;
        for (candidate, supported) in &self.supported {
            if !candidate.same_family(target) || candidate.version > target.version {
                continue;
            }
            if best.map_or(true, |version| candidate.version >= version) {
                best = Some(candidate.version);
                verdict = *supported;
            }
        }
        verdict
    }

    pub fn breaking_changes(&self) -> &[BreakingChangeRecord] {
        &self.breaking_changes
    }
}

/// The static, versioned database of API-to-platform support.
///
/// Loaded wholesale, never mutated; a refresh builds an entirely new
/// instance that readers swap to atomically via [`super::CatalogSlot`].
#[derive(Debug)]
pub struct Catalog {
    version: String,
    built: DateTime<Utc>,
    entries: HashMap<String, CatalogEntry>,
    framework_assemblies: HashSet<String>,
}

impl Catalog {
    pub fn from_document(document: CatalogDocument) -> Self {
        let mut entries: HashMap<String, CatalogEntry> =
            HashMap::with_capacity(document.apis.len());
        for api in document.apis {
            let entry = entries.entry(api.doc_id).or_insert_with(|| CatalogEntry {
                supported: Vec::new(),
                breaking_changes: Vec::new(),
            });
            entry
                .supported
                .extend(api.supported.into_iter().map(|s| (s.target, s.supported)));
            entry.breaking_changes.extend(api.breaking_changes);
        }

        // Deterministic pair order within each entry.
        for entry in entries.values_mut() {
            entry.supported.sort_by(|(a, _), (b, _)| {
                a.family
                    .to_ascii_lowercase()
                    .cmp(&b.family.to_ascii_lowercase())
                    .then(a.version.cmp(&b.version))
            });
        }

        let framework_assemblies = document
            .framework_assemblies
            .into_iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();

        debug!(
            version = %document.version,
            apis = entries.len(),
            "catalog index built"
        );

        Self {
            version: document.version,
            built: document.built,
            entries,
            framework_assemblies,
        }
    }

    /// Decode and index a catalog blob. Any failure is fatal to the run.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_document(store::decode(bytes)?))
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn built(&self) -> DateTime<Utc> {
        self.built
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// O(1) amortized lookup by member doc id.
    pub fn lookup(&self, doc_id: &str) -> Option<&CatalogEntry> {
        self.entries.get(doc_id)
    }

    /// Breaking changes for `doc_id` whose introduced version is at or below
    /// the target's version.
    pub fn breaking_changes_for(&self, doc_id: &str, target: &Target) -> Vec<&BreakingChangeRecord> {
        self.lookup(doc_id)
            .map(|entry| {
                entry
                    .breaking_changes
                    .iter()
                    .filter(|record| record.applies_to(target))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `name` is an assembly the platforms themselves provide.
    pub fn is_framework_assembly(&self, name: &str) -> bool {
        self.framework_assemblies
            .contains(name.to_ascii_lowercase().as_str())
    }
}
