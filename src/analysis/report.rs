//! Reporting result model: the engine's externally consumed output.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::catalog::BreakingChangeRecord;
use crate::types::{AssemblyIdentity, MemberInfo, Target};

/// Why a member ended up in a target's unsupported list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportClassification {
    /// The catalog knows the API and marks the target unsupported.
    KnownUnsupported,
    /// The catalog has no entry and no declarer is user-supplied.
    MissingCatalogData,
    /// The catalog has no entry and the declarers are a mix of user and
    /// non-user assemblies; flagged distinctly rather than guessed.
    AmbiguousUnsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsupportedMember {
    pub member: MemberInfo,
    /// Every plausible declaring assembly, sorted for stable output.
    pub declarers: Vec<AssemblyIdentity>,
    pub classification: SupportClassification,
    /// Breaking changes whose introduced version is at or below the target.
    pub breaking_changes: Vec<BreakingChangeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: Target,
    /// Sorted by declaring assembly name, then member doc id; byte-identical
    /// across runs over identical inputs.
    pub unsupported: Vec<UnsupportedMember>,
}

impl TargetReport {
    pub fn is_fully_supported(&self) -> bool {
        self.unsupported.is_empty()
    }
}

/// Per-run portability verdict, derived fresh and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingResult {
    pub catalog_version: String,
    /// One report per requested target, in request order.
    pub targets: Vec<TargetReport>,
    /// Referencing assembly name -> missing reference names, with
    /// platform-provided assemblies already filtered out.
    pub unresolved_assemblies: BTreeMap<String, BTreeSet<String>>,
}

impl ReportingResult {
    pub fn report_for(&self, target: &Target) -> Option<&TargetReport> {
        self.targets.iter().find(|report| report.target == *target)
    }
}
