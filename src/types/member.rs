//! Externally referenced member identity.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::types::AssemblyIdentity;

/// One externally declared API referenced by an analyzed module.
///
/// Equality is by document identifier plus declaring assembly identity: the
/// same doc id declared by two different assemblies is two distinct members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Stable document identifier, e.g. `M:System.Console.WriteLine(System.String)`.
    pub doc_id: String,
    /// Doc id of the enclosing type, e.g. `T:System.Console`.
    pub type_doc_id: String,
    /// Identity of the declaring assembly, when resolvable.
    pub defined_in: Option<AssemblyIdentity>,
}

impl MemberInfo {
    pub fn new(
        doc_id: impl Into<String>,
        type_doc_id: impl Into<String>,
        defined_in: Option<AssemblyIdentity>,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            type_doc_id: type_doc_id.into(),
            defined_in,
        }
    }

    /// Name of the declaring assembly, empty when unresolved.
    pub fn defined_in_name(&self) -> &str {
        self.defined_in.as_ref().map(|i| i.name.as_str()).unwrap_or("")
    }
}

impl PartialEq for MemberInfo {
    fn eq(&self, other: &Self) -> bool {
        self.doc_id == other.doc_id && self.defined_in == other.defined_in
    }
}

impl Eq for MemberInfo {}

impl Hash for MemberInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.doc_id.hash(state);
        self.defined_in.hash(state);
    }
}

impl PartialOrd for MemberInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemberInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.doc_id
            .cmp(&other.doc_id)
            .then_with(|| self.defined_in.cmp(&other.defined_in))
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.doc_id)
    }
}
