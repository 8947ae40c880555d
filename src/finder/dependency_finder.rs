//! Batch dependency discovery across a set of input binaries.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::finder::progress::ProgressSink;
use crate::metadata::error::MetadataError;
use crate::metadata::reader::{MemberReference, MetadataReader, ModuleMetadata};
use crate::types::{AssemblyIdentity, AssemblyInfo, MemberInfo};

/// An input file that could not be analyzed, with the reason it was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: PathBuf,
    /// Error classification tag, e.g. `InvalidBinaryFormat`.
    pub kind: String,
    pub message: String,
}

/// How a finder run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    /// Cancellation was observed between files; results are partial.
    Cancelled,
}

/// The finder's result object: always produced, never thrown past.
#[derive(Debug)]
pub struct FinderOutcome {
    pub dependencies: DependencyInfo,
    pub status: CompletionStatus,
}

/// Aggregated dependency surface of one analysis run.
///
/// Built once by the merge step and immutable afterwards. The map value for
/// each member is the set of assemblies that could plausibly declare it;
/// ambiguity from type forwarding is preserved, never collapsed to a winner.
#[derive(Debug, Default)]
pub struct DependencyInfo {
    pub dependencies: HashMap<MemberInfo, BTreeSet<AssemblyInfo>>,
    /// Identities of the successfully parsed input files.
    pub user_assemblies: BTreeSet<AssemblyInfo>,
    /// Referencing assembly name -> names referenced but absent from the
    /// user-supplied set.
    pub unresolved_assemblies: BTreeMap<String, BTreeSet<String>>,
    pub failed_files: Vec<FailedFile>,
}

/// Per-file contributions awaiting the merge step.
///
/// Merging is commutative and associative (plain set union), so sub-batches
/// analyzed independently merge to the same result as one full batch.
#[derive(Debug, Default)]
pub struct ModuleContributions {
    pub modules: Vec<ModuleMetadata>,
    pub failed: Vec<FailedFile>,
}

impl ModuleContributions {
    pub fn merge(mut self, other: Self) -> Self {
        self.modules.extend(other.modules);
        self.failed.extend(other.failed);
        self
    }

    /// The single synchronized merge step: dedup members, partition
    /// assemblies, resolve declarers through forwarding chains.
    pub fn into_dependency_info(self) -> DependencyInfo {
        let Self { modules, mut failed } = self;

        detect_identity_conflicts(&modules);

        let user_index: HashMap<&str, &ModuleMetadata> = modules
            .iter()
            .map(|module| (module.assembly.name(), module))
            .collect();

        let mut dependencies: HashMap<MemberInfo, BTreeSet<AssemblyInfo>> = HashMap::new();
        for module in &modules {
            for member in &module.members {
                let (primary, candidates) = resolve_declarers(member, &user_index);
                let info = MemberInfo::new(&member.doc_id, &member.type_doc_id, Some(primary));
                dependencies.entry(info).or_default().extend(candidates);
            }
        }

        let mut unresolved: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for module in &modules {
            let missing: BTreeSet<String> = module
                .referenced_assemblies
                .iter()
                .filter(|identity| !user_index.contains_key(identity.name.as_str()))
                .map(|identity| identity.name.clone())
                .collect();
            if !missing.is_empty() {
                unresolved
                    .entry(module.assembly.name().to_string())
                    .or_default()
                    .extend(missing);
            }
        }

        let user_assemblies = modules
            .iter()
            .map(|module| module.assembly.clone())
            .collect();

        failed.sort_by(|a, b| a.path.cmp(&b.path));

        DependencyInfo {
            dependencies,
            user_assemblies,
            unresolved_assemblies: unresolved,
            failed_files: failed,
        }
    }
}

fn detect_identity_conflicts(modules: &[ModuleMetadata]) {
    let mut by_identity: HashMap<&AssemblyIdentity, &AssemblyInfo> = HashMap::new();
    for module in modules {
        match by_identity.get(&module.assembly.identity) {
            Some(previous) if previous.content_hash != module.assembly.content_hash => {
                warn!(
                    identity = %module.assembly.identity,
                    "same assembly identity with different content hashes; keeping both"
                );
            }
            Some(_) => {}
            None => {
                by_identity.insert(&module.assembly.identity, &module.assembly);
            }
        }
    }
}

/// Follow type-forward chains across the user-supplied set.
///
/// Returns the best declaring identity plus every plausible declarer. A
/// chain that leaves the input set or cycles keeps both sides in the set
/// rather than guessing a winner.
fn resolve_declarers(
    member: &MemberReference,
    user_index: &HashMap<&str, &ModuleMetadata>,
) -> (AssemblyIdentity, BTreeSet<AssemblyInfo>) {
    let mut candidates = BTreeSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut current = member.scope.clone();
    visited.insert(current.name.clone());

    loop {
        let module = match user_index.get(current.name.as_str()) {
            Some(module) => *module,
            None => {
                candidates.insert(AssemblyInfo::referenced(current.clone()));
                return (current, candidates);
            }
        };

        let target = match module.type_forwards.get(&member.type_name) {
            Some(target) => target.clone(),
            None => {
                candidates.insert(module.assembly.clone());
                return (module.assembly.identity.clone(), candidates);
            }
        };

        if !visited.insert(target.name.clone()) {
            // Forwarding cycle in the input set.
            candidates.insert(module.assembly.clone());
            candidates.insert(AssemblyInfo::referenced(target.clone()));
            return (target, candidates);
        }

        if user_index.contains_key(target.name.as_str()) {
            current = target;
            continue;
        }

        // The chain leaves the input set: the target cannot be opened to
        // verify it, so the forwarding assembly stays a plausible declarer.
        candidates.insert(module.assembly.clone());
        candidates.insert(AssemblyInfo::referenced(target.clone()));
        return (target, candidates);
    }
}

/// Orchestrates the metadata reader across a batch of input binaries.
#[derive(Debug, Clone)]
pub struct DependencyFinder {
    concurrency: usize,
}

impl DependencyFinder {
    pub fn new() -> Self {
        Self {
            concurrency: num_cpus::get(),
        }
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Analyze a batch of files into one [`DependencyInfo`].
    ///
    /// Missing files are reported as issues; per-file reader failures are
    /// recorded in the result. One bad file never suppresses the others.
    pub async fn find_dependencies(
        &self,
        files: &[PathBuf],
        progress: &dyn ProgressSink,
    ) -> FinderOutcome {
        let mut existing = Vec::new();
        for path in files {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => existing.push(path.clone()),
                _ => {
                    progress.report_issue(&format!("input file not found: {}", path.display()));
                }
            }
        }

        let task = progress.start_task("Analyzing assemblies", existing.len());
        let mut contributions = ModuleContributions::default();
        let mut status = CompletionStatus::Completed;

        let mut parses = stream::iter(existing.into_iter().map(|path| async move {
            let result = parse_file(&path).await;
            (path, result)
        }))
        .buffer_unordered(self.concurrency);

        while let Some((path, result)) = parses.next().await {
            task.tick();
            match result {
                Ok(module) => contributions.modules.push(module),
                Err(error) => {
                    debug!("skipping {}: {}", path.display(), error);
                    progress
                        .report_issue(&format!("failed to analyze {}: {}", path.display(), error));
                    contributions.failed.push(FailedFile {
                        path,
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    });
                }
            }
            // Cancellation is only observed between files, never mid-parse.
            if progress.is_cancelled() {
                status = CompletionStatus::Cancelled;
                task.abort();
                break;
            }
        }
        drop(parses);

        FinderOutcome {
            dependencies: contributions.into_dependency_info(),
            status,
        }
    }
}

impl Default for DependencyFinder {
    fn default() -> Self {
        Self::new()
    }
}

async fn parse_file(path: &Path) -> Result<ModuleMetadata, MetadataError> {
    let bytes = tokio::fs::read(path).await?;
    tokio::task::spawn_blocking(move || MetadataReader::read(&bytes))
        .await
        .map_err(|join| MetadataError::format(format!("parser task failed: {join}")))?
}
