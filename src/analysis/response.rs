//! Packaging of the finished analysis into the externally consumed object.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::report::ReportingResult;
use crate::finder::DependencyInfo;
use crate::types::Target;

/// The object handed to renderers and workflow stages. Serialization to a
/// concrete format is their concern, not the engine's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub submission_id: String,
    pub targets: Vec<Target>,
    pub result: ReportingResult,
    /// Mirror of the result's filtered unresolved-assembly map.
    pub unresolved_assemblies: BTreeMap<String, BTreeSet<String>>,
    /// One line per input that could not be analyzed.
    pub diagnostics: Vec<String>,
    pub catalog_version: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Pure packaging: combines the pieces, adds no analysis.
pub fn assemble_response(
    submission_id: Option<String>,
    targets: &[Target],
    result: ReportingResult,
    deps: &DependencyInfo,
) -> AnalyzeResponse {
    let submission_id =
        submission_id.unwrap_or_else(|| format!("submission-{}", Uuid::new_v4()));

    let mut diagnostics: Vec<String> = deps
        .failed_files
        .iter()
        .map(|failed| {
            format!(
                "{}: {} ({})",
                failed.path.display(),
                failed.message,
                failed.kind
            )
        })
        .collect();

    // Same identity built from different bytes is worth a diagnostic line.
    let mut previous: Option<&crate::types::AssemblyInfo> = None;
    for assembly in &deps.user_assemblies {
        if let Some(last) = previous {
            if last.identity == assembly.identity && last.content_hash != assembly.content_hash {
                diagnostics.push(format!(
                    "conflicting content for assembly identity {}",
                    assembly.identity
                ));
            }
        }
        previous = Some(assembly);
    }

    AnalyzeResponse {
        submission_id,
        targets: targets.to_vec(),
        catalog_version: result.catalog_version.clone(),
        unresolved_assemblies: result.unresolved_assemblies.clone(),
        result,
        diagnostics,
        analyzed_at: Utc::now(),
    }
}
