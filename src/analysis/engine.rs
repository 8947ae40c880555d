//! Portability analysis: merges dependency data with the catalog into
//! per-target support verdicts.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::analysis::report::{
    ReportingResult, SupportClassification, TargetReport, UnsupportedMember,
};
use crate::catalog::Catalog;
use crate::finder::DependencyInfo;
use crate::types::{AssemblyInfo, MemberInfo, Target};

/// Analyze one dependency surface against the catalog for each requested
/// target.
///
/// A member without a catalog entry is the user's own code when every
/// plausible declarer is user-supplied; otherwise it surfaces as missing
/// catalog data (or ambiguous, when the declarers are mixed) so the causes
/// stay distinguishable downstream.
pub fn analyze(deps: &DependencyInfo, targets: &[Target], catalog: &Catalog) -> ReportingResult {
    let mut reports: Vec<TargetReport> = targets
        .iter()
        .map(|target| TargetReport {
            target: target.clone(),
            unsupported: Vec::new(),
        })
        .collect();

    for (member, declarers) in &deps.dependencies {
        match catalog.lookup(&member.doc_id) {
            Some(entry) => {
                for report in &mut reports {
                    if entry.is_supported(&report.target) {
                        continue;
                    }
                    report.unsupported.push(unsupported(
                        member,
                        declarers,
                        SupportClassification::KnownUnsupported,
                        catalog
                            .breaking_changes_for(&member.doc_id, &report.target)
                            .into_iter()
                            .cloned()
                            .collect(),
                    ));
                }
            }
            None => {
                let user_declarers = declarers
                    .iter()
                    .filter(|declarer| deps.user_assemblies.contains(*declarer))
                    .count();
                let classification = if user_declarers == declarers.len() {
                    // The user's own code: supported everywhere.
                    continue;
                } else if user_declarers == 0 {
                    SupportClassification::MissingCatalogData
                } else {
                    SupportClassification::AmbiguousUnsupported
                };
                for report in &mut reports {
                    report
                        .unsupported
                        .push(unsupported(member, declarers, classification, Vec::new()));
                }
            }
        }
    }

    // Stable ordering so identical inputs produce byte-identical reports:
    // declaring assembly name, then the member's total order (doc id plus
    // full declaring identity, which breaks ties between same-named
    // declarers).
    for report in &mut reports {
        report.unsupported.sort_by(|a, b| {
            a.member
                .defined_in_name()
                .cmp(b.member.defined_in_name())
                .then_with(|| a.member.cmp(&b.member))
        });
    }

    let unresolved_assemblies = filter_unresolved(&deps.unresolved_assemblies, catalog);

    info!(
        members = deps.dependencies.len(),
        targets = targets.len(),
        unresolved = unresolved_assemblies.len(),
        "portability analysis complete"
    );

    ReportingResult {
        catalog_version: catalog.version().to_string(),
        targets: reports,
        unresolved_assemblies,
    }
}

fn unsupported(
    member: &MemberInfo,
    declarers: &BTreeSet<AssemblyInfo>,
    classification: SupportClassification,
    breaking_changes: Vec<crate::catalog::BreakingChangeRecord>,
) -> UnsupportedMember {
    UnsupportedMember {
        member: member.clone(),
        declarers: declarers
            .iter()
            .map(|declarer| declarer.identity.clone())
            .collect(),
        classification,
        breaking_changes,
    }
}

/// Unresolved references are reported per submission, minus the assemblies
/// the platforms themselves provide.
fn filter_unresolved(
    unresolved: &BTreeMap<String, BTreeSet<String>>,
    catalog: &Catalog,
) -> BTreeMap<String, BTreeSet<String>> {
    unresolved
        .iter()
        .filter_map(|(referencing, missing)| {
            let remaining: BTreeSet<String> = missing
                .iter()
                .filter(|name| !catalog.is_framework_assembly(name))
                .cloned()
                .collect();
            if remaining.is_empty() {
                None
            } else {
                Some((referencing.clone(), remaining))
            }
        })
        .collect()
}
