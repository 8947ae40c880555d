//! Extracts the dependency surface of one compiled module.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::metadata::error::{MetadataError, Result};
use crate::metadata::pe::PeImage;
use crate::metadata::signature::{self, MemberKind};
use crate::metadata::streams::MetadataRoot;
use crate::metadata::tables::{
    ExportedTypeImpl, MemberRefParent, Tables, TypeRefScope,
};
use crate::types::{AssemblyIdentity, AssemblyInfo, FrameworkVersion, PublicKeyToken};

/// Assemblies that can anchor the runtime root type (`System.Object`).
static CORE_ASSEMBLIES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "mscorlib",
        "system.runtime",
        "system.private.corelib",
        "netstandard",
    ]
    .into_iter()
    .collect()
});

/// Assembly flag marking a full public key rather than a token.
const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;
/// ExportedType flag marking a type forwarder.
const TD_FORWARDER: u32 = 0x0020_0000;

const MAX_NESTING_DEPTH: usize = 64;

/// One externally declared member referenced by the module.
#[derive(Debug, Clone)]
pub struct MemberReference {
    pub doc_id: String,
    pub type_doc_id: String,
    /// Plain dotted name of the enclosing type (type-forward chain key).
    pub type_name: String,
    /// Identity of the assembly the reference is scoped to.
    pub scope: AssemblyIdentity,
}

/// Everything the dependency finder needs from one module.
#[derive(Debug)]
pub struct ModuleMetadata {
    pub assembly: AssemblyInfo,
    /// Distinct external member references in first-seen order.
    pub members: Vec<MemberReference>,
    /// Distinct referenced assembly identities in row order.
    pub referenced_assemblies: Vec<AssemblyIdentity>,
    /// Forwarded type name -> assembly now declaring it.
    pub type_forwards: HashMap<String, AssemblyIdentity>,
}

pub struct MetadataReader;

impl MetadataReader {
    /// Read one module image without executing any of its code.
    pub fn read(data: &[u8]) -> Result<ModuleMetadata> {
        let image = PeImage::parse(data)?;
        let root = MetadataRoot::parse(image.metadata()?)?;
        let tables = Tables::parse(root.tables, root.strings)?;

        let identity = module_identity(&tables, &root)?;
        debug!(
            module = %identity,
            format = ?image.format,
            runtime = %root.version,
            "parsed module metadata"
        );

        let referenced = assembly_ref_identities(&tables, &root)?;
        check_runtime_root(&tables, &referenced, &identity)?;

        let type_refs = resolve_type_refs(&tables)?;
        let type_spec_targets = resolve_type_specs(&tables, &root, &type_refs)?;

        // Doc-id parameter rendering resolves TypeDefOrRef tokens by name only.
        let token_resolver = |token: u32| -> Result<String> {
            let index = (token >> 2) as usize;
            if index == 0 {
                return Err(MetadataError::format("null type token in signature"));
            }
            match token & 0x3 {
                0 => {
                    let row = tables
                        .type_defs
                        .get(index - 1)
                        .ok_or_else(|| MetadataError::format("TypeDef token out of range"))?;
                    Ok(full_name(&row.namespace, &row.name))
                }
                1 => type_refs
                    .get(index - 1)
                    .map(|r| r.full_name.clone())
                    .ok_or_else(|| MetadataError::format("TypeRef token out of range")),
                2 => type_spec_targets
                    .get(index - 1)
                    .and_then(|t| t.as_ref())
                    .map(|t| t.name.clone())
                    .ok_or_else(|| MetadataError::format("unresolvable TypeSpec token")),
                _ => Err(MetadataError::format("malformed type token in signature")),
            }
        };

        let mut members = Vec::new();
        let mut seen = HashSet::new();
        for row in &tables.member_refs {
            let (type_name, assembly_index) = match row.parent {
                MemberRefParent::TypeRef(index) => {
                    let info = type_refs
                        .get((index as usize).wrapping_sub(1))
                        .ok_or_else(|| MetadataError::format("MemberRef parent out of range"))?;
                    match info.assembly_ref {
                        Some(assembly_index) => (info.full_name.clone(), assembly_index),
                        // Scoped to this module or a sibling module: not external.
                        None => continue,
                    }
                }
                MemberRefParent::TypeSpec(index) => {
                    match type_spec_targets
                        .get((index as usize).wrapping_sub(1))
                        .ok_or_else(|| MetadataError::format("MemberRef parent out of range"))?
                    {
                        Some(TypeSpecTarget {
                            name,
                            assembly_ref: Some(assembly_index),
                        }) => (name.clone(), *assembly_index),
                        _ => continue,
                    }
                }
                // TypeDef, MethodDef and ModuleRef parents are module-local.
                _ => continue,
            };

            let signature = root.blob.get(row.signature)?;
            let kind = signature::classify(signature)?;
            let doc_id = render_doc_id(&type_name, &row.name, kind, signature, &token_resolver)?;

            let scope = referenced
                .get(assembly_index)
                .ok_or_else(|| MetadataError::format("AssemblyRef index out of range"))?
                .clone();

            if seen.insert((doc_id.clone(), assembly_index)) {
                members.push(MemberReference {
                    type_doc_id: format!("T:{type_name}"),
                    type_name,
                    doc_id,
                    scope,
                });
            }
        }

        let type_forwards = collect_type_forwards(&tables, &referenced)?;

        Ok(ModuleMetadata {
            assembly: AssemblyInfo::opened(identity, data),
            members,
            referenced_assemblies: dedup_identities(referenced),
            type_forwards,
        })
    }
}

fn module_identity(tables: &Tables, root: &MetadataRoot<'_>) -> Result<AssemblyIdentity> {
    match &tables.assembly {
        Some(row) => {
            let mut identity = AssemblyIdentity {
                name: row.name.clone(),
                version: version_from_words(row.version),
                culture: culture_or_neutral(&row.culture),
                public_key_token: None,
            };
            if row.public_key != 0 {
                let key = root.blob.get(row.public_key)?;
                if !key.is_empty() {
                    identity.public_key_token = Some(PublicKeyToken::from_public_key(key));
                }
            }
            Ok(identity)
        }
        // Netmodules carry no assembly manifest; fall back to the module name.
        None => Ok(AssemblyIdentity::new(
            strip_module_extension(&tables.module_name),
            FrameworkVersion::with_build(0, 0, 0, 0),
        )),
    }
}

fn assembly_ref_identities(
    tables: &Tables,
    root: &MetadataRoot<'_>,
) -> Result<Vec<AssemblyIdentity>> {
    let mut identities = Vec::with_capacity(tables.assembly_refs.len());
    for row in &tables.assembly_refs {
        let mut identity = AssemblyIdentity {
            name: row.name.clone(),
            version: version_from_words(row.version),
            culture: culture_or_neutral(&row.culture),
            public_key_token: None,
        };
        if row.public_key_or_token != 0 {
            let blob = root.blob.get(row.public_key_or_token)?;
            if row.flags & ASSEMBLY_FLAG_PUBLIC_KEY != 0 && !blob.is_empty() {
                identity.public_key_token = Some(PublicKeyToken::from_public_key(blob));
            } else if blob.len() == 8 {
                let mut token = [0u8; 8];
                token.copy_from_slice(blob);
                identity.public_key_token = Some(PublicKeyToken::new(token));
            }
        }
        identities.push(identity);
    }
    Ok(identities)
}

fn check_runtime_root(
    tables: &Tables,
    referenced: &[AssemblyIdentity],
    identity: &AssemblyIdentity,
) -> Result<()> {
    // Only the <Module> placeholder: nothing to anchor.
    if tables.type_defs.len() <= 1 {
        return Ok(());
    }
    let declares_object = tables
        .type_defs
        .iter()
        .any(|row| row.namespace == "System" && row.name == "Object");
    if declares_object {
        return Ok(());
    }
    let references_core = referenced
        .iter()
        .any(|id| CORE_ASSEMBLIES.contains(id.name.to_ascii_lowercase().as_str()));
    if references_core {
        return Ok(());
    }
    Err(MetadataError::RuntimeTypeNotFound {
        assembly: identity.name.clone(),
    })
}

#[derive(Debug, Clone)]
struct ResolvedTypeRef {
    full_name: String,
    /// 0-based AssemblyRef row, `None` for module-local scopes.
    assembly_ref: Option<usize>,
}

fn resolve_type_refs(tables: &Tables) -> Result<Vec<ResolvedTypeRef>> {
    fn resolve(
        index: usize,
        tables: &Tables,
        memo: &mut Vec<Option<ResolvedTypeRef>>,
        depth: usize,
    ) -> Result<ResolvedTypeRef> {
        if depth > MAX_NESTING_DEPTH {
            return Err(MetadataError::format("cyclic TypeRef nesting"));
        }
        if let Some(resolved) = &memo[index] {
            return Ok(resolved.clone());
        }
        let row = &tables.type_refs[index];
        let resolved = match row.scope {
            TypeRefScope::AssemblyRef(assembly) => {
                if assembly == 0 {
                    return Err(MetadataError::format("null AssemblyRef scope"));
                }
                ResolvedTypeRef {
                    full_name: full_name(&row.namespace, &row.name),
                    assembly_ref: Some(assembly as usize - 1),
                }
            }
            TypeRefScope::Nested(enclosing) => {
                if enclosing == 0 || enclosing as usize > tables.type_refs.len() {
                    return Err(MetadataError::format("nested TypeRef scope out of range"));
                }
                let outer = resolve(enclosing as usize - 1, tables, memo, depth + 1)?;
                ResolvedTypeRef {
                    // Doc ids join nested type names with '.'.
                    full_name: format!("{}.{}", outer.full_name, row.name),
                    assembly_ref: outer.assembly_ref,
                }
            }
            TypeRefScope::Module | TypeRefScope::ModuleRef(_) => ResolvedTypeRef {
                full_name: full_name(&row.namespace, &row.name),
                assembly_ref: None,
            },
        };
        memo[index] = Some(resolved.clone());
        Ok(resolved)
    }

    let mut memo = vec![None; tables.type_refs.len()];
    for index in 0..tables.type_refs.len() {
        resolve(index, tables, &mut memo, 0)?;
    }
    let mut resolved = Vec::with_capacity(memo.len());
    for entry in memo {
        match entry {
            Some(type_ref) => resolved.push(type_ref),
            None => return Err(MetadataError::format("unresolved TypeRef row")),
        }
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
struct TypeSpecTarget {
    name: String,
    assembly_ref: Option<usize>,
}

fn resolve_type_specs(
    tables: &Tables,
    root: &MetadataRoot<'_>,
    type_refs: &[ResolvedTypeRef],
) -> Result<Vec<Option<TypeSpecTarget>>> {
    // TypeSpec-in-TypeSpec tokens are rejected here; signatures in the wild
    // reference named types or generic parameters.
    let base_resolver = |token: u32| -> Result<String> {
        let index = (token >> 2) as usize;
        if index == 0 {
            return Err(MetadataError::format("null type token in TypeSpec"));
        }
        match token & 0x3 {
            0 => tables
                .type_defs
                .get(index - 1)
                .map(|row| full_name(&row.namespace, &row.name))
                .ok_or_else(|| MetadataError::format("TypeDef token out of range")),
            1 => type_refs
                .get(index - 1)
                .map(|r| r.full_name.clone())
                .ok_or_else(|| MetadataError::format("TypeRef token out of range")),
            _ => Err(MetadataError::format("nested TypeSpec token")),
        }
    };

    let mut targets = Vec::with_capacity(tables.type_specs.len());
    for offset in &tables.type_specs {
        let blob = root.blob.get(*offset)?;
        let target = match signature::type_spec_primary_token(blob)? {
            Some(token) => {
                let index = (token >> 2) as usize;
                match token & 0x3 {
                    // TypeDef: constructed over a local type, not external.
                    0 => None,
                    1 => {
                        let type_ref = type_refs.get(index.wrapping_sub(1)).ok_or_else(|| {
                            MetadataError::format("TypeSpec TypeRef token out of range")
                        })?;
                        Some(TypeSpecTarget {
                            name: type_ref.full_name.clone(),
                            assembly_ref: type_ref.assembly_ref,
                        })
                    }
                    _ => None,
                }
            }
            // Arrays of primitives, generic parameters and the like: no
            // named type to attribute the member to.
            None => signature::parse_type_spec(blob, &base_resolver)
                .ok()
                .map(|name| TypeSpecTarget {
                    name,
                    assembly_ref: None,
                }),
        };
        targets.push(target);
    }
    Ok(targets)
}

fn render_doc_id(
    type_name: &str,
    member_name: &str,
    kind: MemberKind,
    signature_blob: &[u8],
    resolver: &dyn Fn(u32) -> Result<String>,
) -> Result<String> {
    // Constructors use '#' in doc ids ('.' is the nesting separator).
    let member_name = match member_name {
        ".ctor" => "#ctor",
        ".cctor" => "#cctor",
        other => other,
    };

    let mut doc_id = format!("{}:{}.{}", kind.doc_prefix(), type_name, member_name);
    if kind == MemberKind::Method {
        let sig = signature::parse_method(signature_blob, resolver)?;
        if sig.generic_arity > 0 {
            doc_id.push_str(&format!("``{}", sig.generic_arity));
        }
        if !sig.params.is_empty() {
            doc_id.push('(');
            doc_id.push_str(&sig.params.join(","));
            doc_id.push(')');
        }
    }
    Ok(doc_id)
}

fn collect_type_forwards(
    tables: &Tables,
    referenced: &[AssemblyIdentity],
) -> Result<HashMap<String, AssemblyIdentity>> {
    fn resolve_export(
        index: usize,
        tables: &Tables,
        referenced: &[AssemblyIdentity],
        depth: usize,
    ) -> Result<Option<(String, AssemblyIdentity)>> {
        if depth > MAX_NESTING_DEPTH {
            return Err(MetadataError::format("cyclic ExportedType nesting"));
        }
        let row = &tables.exported_types[index];
        match row.implementation {
            ExportedTypeImpl::AssemblyRef(assembly) => {
                let target = referenced
                    .get((assembly as usize).wrapping_sub(1))
                    .ok_or_else(|| {
                        MetadataError::format("ExportedType AssemblyRef out of range")
                    })?
                    .clone();
                Ok(Some((full_name(&row.namespace, &row.name), target)))
            }
            ExportedTypeImpl::ExportedType(parent) => {
                if parent == 0 || parent as usize > tables.exported_types.len() {
                    return Err(MetadataError::format("ExportedType parent out of range"));
                }
                let outer = resolve_export(parent as usize - 1, tables, referenced, depth + 1)?;
                Ok(outer.map(|(name, target)| (format!("{}.{}", name, row.name), target)))
            }
            // Types in sibling modules are not forwards.
            ExportedTypeImpl::File(_) => Ok(None),
        }
    }

    let mut forwards = HashMap::new();
    for (index, row) in tables.exported_types.iter().enumerate() {
        if row.flags & TD_FORWARDER == 0 {
            continue;
        }
        if let Some((name, target)) = resolve_export(index, tables, referenced, 0)? {
            forwards.insert(name, target);
        }
    }
    Ok(forwards)
}

fn dedup_identities(identities: Vec<AssemblyIdentity>) -> Vec<AssemblyIdentity> {
    let mut seen = HashSet::new();
    identities
        .into_iter()
        .filter(|identity| seen.insert(identity.clone()))
        .collect()
}

fn full_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

fn culture_or_neutral(culture: &str) -> String {
    if culture.is_empty() {
        "neutral".to_string()
    } else {
        culture.to_string()
    }
}

fn strip_module_extension(module_name: &str) -> String {
    for extension in [".dll", ".exe", ".netmodule"] {
        if module_name.to_ascii_lowercase().ends_with(extension) {
            return module_name[..module_name.len() - extension.len()].to_string();
        }
    }
    module_name.to_string()
}

fn version_from_words(words: (u16, u16, u16, u16)) -> FrameworkVersion {
    FrameworkVersion::with_build(
        u32::from(words.0),
        u32::from(words.1),
        u32::from(words.2),
        u32::from(words.3),
    )
}
