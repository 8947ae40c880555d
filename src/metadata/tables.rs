//! `#~` tables stream parsing (ECMA-335 II.22, II.24.2.6).
//!
//! Row sizes are computed for every table present in the image so the parser
//! can skip tables it does not consume; index widths follow the heap-size
//! flags and the coded-index rules.

use crate::metadata::cursor::Cursor;
use crate::metadata::error::{MetadataError, Result};
use crate::metadata::streams::StringsHeap;

pub const MODULE: usize = 0x00;
pub const TYPE_REF: usize = 0x01;
pub const TYPE_DEF: usize = 0x02;
pub const FIELD: usize = 0x04;
pub const METHOD_DEF: usize = 0x06;
pub const PARAM: usize = 0x08;
pub const INTERFACE_IMPL: usize = 0x09;
pub const MEMBER_REF: usize = 0x0A;
pub const CONSTANT: usize = 0x0B;
pub const CUSTOM_ATTRIBUTE: usize = 0x0C;
pub const FIELD_MARSHAL: usize = 0x0D;
pub const DECL_SECURITY: usize = 0x0E;
pub const CLASS_LAYOUT: usize = 0x0F;
pub const FIELD_LAYOUT: usize = 0x10;
pub const STANDALONE_SIG: usize = 0x11;
pub const EVENT_MAP: usize = 0x12;
pub const EVENT: usize = 0x14;
pub const PROPERTY_MAP: usize = 0x15;
pub const PROPERTY: usize = 0x17;
pub const METHOD_SEMANTICS: usize = 0x18;
pub const METHOD_IMPL: usize = 0x19;
pub const MODULE_REF: usize = 0x1A;
pub const TYPE_SPEC: usize = 0x1B;
pub const IMPL_MAP: usize = 0x1C;
pub const FIELD_RVA: usize = 0x1D;
pub const ASSEMBLY: usize = 0x20;
pub const ASSEMBLY_PROCESSOR: usize = 0x21;
pub const ASSEMBLY_OS: usize = 0x22;
pub const ASSEMBLY_REF: usize = 0x23;
pub const ASSEMBLY_REF_PROCESSOR: usize = 0x24;
pub const ASSEMBLY_REF_OS: usize = 0x25;
pub const FILE: usize = 0x26;
pub const EXPORTED_TYPE: usize = 0x27;
pub const MANIFEST_RESOURCE: usize = 0x28;
pub const NESTED_CLASS: usize = 0x29;
pub const GENERIC_PARAM: usize = 0x2A;
pub const METHOD_SPEC: usize = 0x2B;
pub const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

const TABLE_COUNT: usize = 64;

// Coded-index groups, in tag order.
const TYPE_DEF_OR_REF: (&[usize], u32) = (&[TYPE_DEF, TYPE_REF, TYPE_SPEC], 2);
const HAS_CONSTANT: (&[usize], u32) = (&[FIELD, PARAM, PROPERTY], 2);
const HAS_CUSTOM_ATTRIBUTE: (&[usize], u32) = (
    &[
        METHOD_DEF,
        FIELD,
        TYPE_REF,
        TYPE_DEF,
        PARAM,
        INTERFACE_IMPL,
        MEMBER_REF,
        MODULE,
        DECL_SECURITY,
        PROPERTY,
        EVENT,
        STANDALONE_SIG,
        MODULE_REF,
        TYPE_SPEC,
        ASSEMBLY,
        ASSEMBLY_REF,
        FILE,
        EXPORTED_TYPE,
        MANIFEST_RESOURCE,
        GENERIC_PARAM,
        GENERIC_PARAM_CONSTRAINT,
        METHOD_SPEC,
    ],
    5,
);
const HAS_FIELD_MARSHAL: (&[usize], u32) = (&[FIELD, PARAM], 1);
const HAS_DECL_SECURITY: (&[usize], u32) = (&[TYPE_DEF, METHOD_DEF, ASSEMBLY], 2);
const MEMBER_REF_PARENT: (&[usize], u32) =
    (&[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC], 3);
const HAS_SEMANTICS: (&[usize], u32) = (&[EVENT, PROPERTY], 1);
const METHOD_DEF_OR_REF: (&[usize], u32) = (&[METHOD_DEF, MEMBER_REF], 1);
const MEMBER_FORWARDED: (&[usize], u32) = (&[FIELD, METHOD_DEF], 1);
const IMPLEMENTATION: (&[usize], u32) = (&[FILE, ASSEMBLY_REF, EXPORTED_TYPE], 2);
const CUSTOM_ATTRIBUTE_TYPE: (&[usize], u32) = (&[METHOD_DEF, MEMBER_REF], 3);
const RESOLUTION_SCOPE: (&[usize], u32) = (&[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF], 2);
const TYPE_OR_METHOD_DEF: (&[usize], u32) = (&[TYPE_DEF, METHOD_DEF], 1);

/// Resolution scope of a TypeRef row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRefScope {
    /// Declared in the current module.
    Module,
    /// Declared in another module of the same assembly.
    ModuleRef(u32),
    /// Declared in another assembly (1-based AssemblyRef row).
    AssemblyRef(u32),
    /// Nested inside another TypeRef (1-based TypeRef row).
    Nested(u32),
}

#[derive(Debug, Clone)]
pub struct TypeRefRow {
    pub scope: TypeRefScope,
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct TypeDefRow {
    pub flags: u32,
    pub name: String,
    pub namespace: String,
}

/// Parent of a MemberRef row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRefParent {
    TypeDef(u32),
    TypeRef(u32),
    ModuleRef(u32),
    MethodDef(u32),
    TypeSpec(u32),
}

#[derive(Debug, Clone)]
pub struct MemberRefRow {
    pub parent: MemberRefParent,
    pub name: String,
    /// Offset of the member signature in the `#Blob` heap.
    pub signature: u32,
}

#[derive(Debug, Clone)]
pub struct AssemblyRow {
    pub version: (u16, u16, u16, u16),
    pub flags: u32,
    /// Blob offset of the full public key (0 when unsigned).
    pub public_key: u32,
    pub name: String,
    pub culture: String,
}

#[derive(Debug, Clone)]
pub struct AssemblyRefRow {
    pub version: (u16, u16, u16, u16),
    pub flags: u32,
    /// Blob offset of the public key or token (flag 0x0001 marks a full key).
    pub public_key_or_token: u32,
    pub name: String,
    pub culture: String,
}

/// Implementation target of an ExportedType row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportedTypeImpl {
    File(u32),
    AssemblyRef(u32),
    ExportedType(u32),
}

#[derive(Debug, Clone)]
pub struct ExportedTypeRow {
    pub flags: u32,
    pub name: String,
    pub namespace: String,
    pub implementation: ExportedTypeImpl,
}

/// The subset of metadata tables dependency discovery consumes.
#[derive(Debug, Default)]
pub struct Tables {
    pub module_name: String,
    pub type_refs: Vec<TypeRefRow>,
    pub type_defs: Vec<TypeDefRow>,
    pub member_refs: Vec<MemberRefRow>,
    /// Blob offsets of TypeSpec signatures, in row order.
    pub type_specs: Vec<u32>,
    pub assembly: Option<AssemblyRow>,
    pub assembly_refs: Vec<AssemblyRefRow>,
    pub exported_types: Vec<ExportedTypeRow>,
}

struct Layout {
    rows: [u32; TABLE_COUNT],
    wide_string: bool,
    wide_guid: bool,
    wide_blob: bool,
}

impl Layout {
    fn index_wide(&self, table: usize) -> bool {
        self.rows[table] > 0xFFFF
    }

    fn coded_wide(&self, group: (&[usize], u32)) -> bool {
        let (members, bits) = group;
        let limit = 1u32 << (16 - bits);
        members.iter().any(|table| self.rows[*table] >= limit)
    }

    fn index_size(&self, table: usize) -> usize {
        if self.index_wide(table) {
            4
        } else {
            2
        }
    }

    fn coded_size(&self, group: (&[usize], u32)) -> usize {
        if self.coded_wide(group) {
            4
        } else {
            2
        }
    }

    fn string_size(&self) -> usize {
        if self.wide_string {
            4
        } else {
            2
        }
    }

    fn guid_size(&self) -> usize {
        if self.wide_guid {
            4
        } else {
            2
        }
    }

    fn blob_size(&self) -> usize {
        if self.wide_blob {
            4
        } else {
            2
        }
    }

    fn row_size(&self, table: usize) -> Result<usize> {
        let size = match table {
            MODULE => 2 + self.string_size() + 3 * self.guid_size(),
            TYPE_REF => self.coded_size(RESOLUTION_SCOPE) + 2 * self.string_size(),
            TYPE_DEF => {
                4 + 2 * self.string_size()
                    + self.coded_size(TYPE_DEF_OR_REF)
                    + self.index_size(FIELD)
                    + self.index_size(METHOD_DEF)
            }
            FIELD => 2 + self.string_size() + self.blob_size(),
            METHOD_DEF => 4 + 2 + 2 + self.string_size() + self.blob_size() + self.index_size(PARAM),
            PARAM => 2 + 2 + self.string_size(),
            INTERFACE_IMPL => self.index_size(TYPE_DEF) + self.coded_size(TYPE_DEF_OR_REF),
            MEMBER_REF => {
                self.coded_size(MEMBER_REF_PARENT) + self.string_size() + self.blob_size()
            }
            CONSTANT => 2 + self.coded_size(HAS_CONSTANT) + self.blob_size(),
            CUSTOM_ATTRIBUTE => {
                self.coded_size(HAS_CUSTOM_ATTRIBUTE)
                    + self.coded_size(CUSTOM_ATTRIBUTE_TYPE)
                    + self.blob_size()
            }
            FIELD_MARSHAL => self.coded_size(HAS_FIELD_MARSHAL) + self.blob_size(),
            DECL_SECURITY => 2 + self.coded_size(HAS_DECL_SECURITY) + self.blob_size(),
            CLASS_LAYOUT => 2 + 4 + self.index_size(TYPE_DEF),
            FIELD_LAYOUT => 4 + self.index_size(FIELD),
            STANDALONE_SIG => self.blob_size(),
            EVENT_MAP => self.index_size(TYPE_DEF) + self.index_size(EVENT),
            EVENT => 2 + self.string_size() + self.coded_size(TYPE_DEF_OR_REF),
            PROPERTY_MAP => self.index_size(TYPE_DEF) + self.index_size(PROPERTY),
            PROPERTY => 2 + self.string_size() + self.blob_size(),
            METHOD_SEMANTICS => {
                2 + self.index_size(METHOD_DEF) + self.coded_size(HAS_SEMANTICS)
            }
            METHOD_IMPL => {
                self.index_size(TYPE_DEF) + 2 * self.coded_size(METHOD_DEF_OR_REF)
            }
            MODULE_REF => self.string_size(),
            TYPE_SPEC => self.blob_size(),
            IMPL_MAP => {
                2 + self.coded_size(MEMBER_FORWARDED)
                    + self.string_size()
                    + self.index_size(MODULE_REF)
            }
            FIELD_RVA => 4 + self.index_size(FIELD),
            ASSEMBLY => 4 + 4 * 2 + 4 + self.blob_size() + 2 * self.string_size(),
            ASSEMBLY_PROCESSOR => 4,
            ASSEMBLY_OS => 4 * 3,
            ASSEMBLY_REF => {
                4 * 2 + 4 + 2 * self.blob_size() + 2 * self.string_size()
            }
            ASSEMBLY_REF_PROCESSOR => 4 + self.index_size(ASSEMBLY_REF),
            ASSEMBLY_REF_OS => 4 * 3 + self.index_size(ASSEMBLY_REF),
            FILE => 4 + self.string_size() + self.blob_size(),
            EXPORTED_TYPE => {
                4 + 4 + 2 * self.string_size() + self.coded_size(IMPLEMENTATION)
            }
            MANIFEST_RESOURCE => {
                4 + 4 + self.string_size() + self.coded_size(IMPLEMENTATION)
            }
            NESTED_CLASS => 2 * self.index_size(TYPE_DEF),
            GENERIC_PARAM => {
                2 + 2 + self.coded_size(TYPE_OR_METHOD_DEF) + self.string_size()
            }
            METHOD_SPEC => self.coded_size(METHOD_DEF_OR_REF) + self.blob_size(),
            GENERIC_PARAM_CONSTRAINT => {
                self.index_size(GENERIC_PARAM) + self.coded_size(TYPE_DEF_OR_REF)
            }
            other => {
                return Err(MetadataError::format(format!(
                    "unknown metadata table 0x{other:02x}"
                )))
            }
        };
        Ok(size)
    }
}

fn decode_coded(value: u32, group: (&[usize], u32)) -> Result<(usize, u32)> {
    let (members, bits) = group;
    let tag = (value & ((1 << bits) - 1)) as usize;
    let index = value >> bits;
    if tag >= members.len() {
        return Err(MetadataError::format(format!(
            "coded index tag {tag} out of range"
        )));
    }
    Ok((tag, index))
}

impl Tables {
    pub fn parse(data: &[u8], strings: StringsHeap<'_>) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        cursor.skip(4)?; // reserved
        cursor.skip(2)?; // major, minor
        let heap_sizes = cursor.read_u8()?;
        cursor.skip(1)?; // reserved
        let valid = cursor.read_u64()?;
        let _sorted = cursor.read_u64()?;

        let mut layout = Layout {
            rows: [0u32; TABLE_COUNT],
            wide_string: heap_sizes & 0x01 != 0,
            wide_guid: heap_sizes & 0x02 != 0,
            wide_blob: heap_sizes & 0x04 != 0,
        };
        for table in 0..TABLE_COUNT {
            if valid & (1u64 << table) != 0 {
                layout.rows[table] = cursor.read_u32()?;
            }
        }

        let mut tables = Tables::default();

        for table in 0..TABLE_COUNT {
            let rows = layout.rows[table];
            if rows == 0 {
                continue;
            }
            match table {
                MODULE => {
                    for row in 0..rows {
                        cursor.skip(2)?; // generation
                        let name = cursor.read_index(layout.wide_string)?;
                        cursor.skip(3 * layout.guid_size())?;
                        if row == 0 {
                            tables.module_name = strings.get(name)?.to_string();
                        }
                    }
                }
                TYPE_REF => {
                    let wide_scope = layout.coded_wide(RESOLUTION_SCOPE);
                    for _ in 0..rows {
                        let scope = cursor.read_index(wide_scope)?;
                        let name = cursor.read_index(layout.wide_string)?;
                        let namespace = cursor.read_index(layout.wide_string)?;
                        let (tag, index) = decode_coded(scope, RESOLUTION_SCOPE)?;
                        let scope = match tag {
                            0 => TypeRefScope::Module,
                            1 => TypeRefScope::ModuleRef(index),
                            2 => TypeRefScope::AssemblyRef(index),
                            3 => TypeRefScope::Nested(index),
                            _ => unreachable!(),
                        };
                        tables.type_refs.push(TypeRefRow {
                            scope,
                            name: strings.get(name)?.to_string(),
                            namespace: strings.get(namespace)?.to_string(),
                        });
                    }
                }
                TYPE_DEF => {
                    let extends = layout.coded_size(TYPE_DEF_OR_REF);
                    let tail = extends + layout.index_size(FIELD) + layout.index_size(METHOD_DEF);
                    for _ in 0..rows {
                        let flags = cursor.read_u32()?;
                        let name = cursor.read_index(layout.wide_string)?;
                        let namespace = cursor.read_index(layout.wide_string)?;
                        cursor.skip(tail)?;
                        tables.type_defs.push(TypeDefRow {
                            flags,
                            name: strings.get(name)?.to_string(),
                            namespace: strings.get(namespace)?.to_string(),
                        });
                    }
                }
                MEMBER_REF => {
                    let wide_parent = layout.coded_wide(MEMBER_REF_PARENT);
                    for _ in 0..rows {
                        let parent = cursor.read_index(wide_parent)?;
                        let name = cursor.read_index(layout.wide_string)?;
                        let signature = cursor.read_index(layout.wide_blob)?;
                        let (tag, index) = decode_coded(parent, MEMBER_REF_PARENT)?;
                        let parent = match tag {
                            0 => MemberRefParent::TypeDef(index),
                            1 => MemberRefParent::TypeRef(index),
                            2 => MemberRefParent::ModuleRef(index),
                            3 => MemberRefParent::MethodDef(index),
                            4 => MemberRefParent::TypeSpec(index),
                            _ => unreachable!(),
                        };
                        tables.member_refs.push(MemberRefRow {
                            parent,
                            name: strings.get(name)?.to_string(),
                            signature,
                        });
                    }
                }
                TYPE_SPEC => {
                    for _ in 0..rows {
                        let signature = cursor.read_index(layout.wide_blob)?;
                        tables.type_specs.push(signature);
                    }
                }
                ASSEMBLY => {
                    for row in 0..rows {
                        cursor.skip(4)?; // hash algorithm
                        let major = cursor.read_u16()?;
                        let minor = cursor.read_u16()?;
                        let build = cursor.read_u16()?;
                        let revision = cursor.read_u16()?;
                        let flags = cursor.read_u32()?;
                        let public_key = cursor.read_index(layout.wide_blob)?;
                        let name = cursor.read_index(layout.wide_string)?;
                        let culture = cursor.read_index(layout.wide_string)?;
                        if row == 0 {
                            tables.assembly = Some(AssemblyRow {
                                version: (major, minor, build, revision),
                                flags,
                                public_key,
                                name: strings.get(name)?.to_string(),
                                culture: strings.get(culture)?.to_string(),
                            });
                        }
                    }
                }
                ASSEMBLY_REF => {
                    for _ in 0..rows {
                        let major = cursor.read_u16()?;
                        let minor = cursor.read_u16()?;
                        let build = cursor.read_u16()?;
                        let revision = cursor.read_u16()?;
                        let flags = cursor.read_u32()?;
                        let public_key_or_token = cursor.read_index(layout.wide_blob)?;
                        let name = cursor.read_index(layout.wide_string)?;
                        let culture = cursor.read_index(layout.wide_string)?;
                        cursor.skip(layout.blob_size())?; // hash value
                        tables.assembly_refs.push(AssemblyRefRow {
                            version: (major, minor, build, revision),
                            flags,
                            public_key_or_token,
                            name: strings.get(name)?.to_string(),
                            culture: strings.get(culture)?.to_string(),
                        });
                    }
                }
                EXPORTED_TYPE => {
                    let wide_impl = layout.coded_wide(IMPLEMENTATION);
                    for _ in 0..rows {
                        let flags = cursor.read_u32()?;
                        cursor.skip(4)?; // TypeDefId hint
                        let name = cursor.read_index(layout.wide_string)?;
                        let namespace = cursor.read_index(layout.wide_string)?;
                        let implementation = cursor.read_index(wide_impl)?;
                        let (tag, index) = decode_coded(implementation, IMPLEMENTATION)?;
                        let implementation = match tag {
                            0 => ExportedTypeImpl::File(index),
                            1 => ExportedTypeImpl::AssemblyRef(index),
                            2 => ExportedTypeImpl::ExportedType(index),
                            _ => unreachable!(),
                        };
                        tables.exported_types.push(ExportedTypeRow {
                            flags,
                            name: strings.get(name)?.to_string(),
                            namespace: strings.get(namespace)?.to_string(),
                            implementation,
                        });
                    }
                }
                other => {
                    let size = layout
                        .row_size(other)?
                        .checked_mul(rows as usize)
                        .ok_or_else(|| MetadataError::format("table size overflow"))?;
                    cursor.skip(size)?;
                }
            }
        }

        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_layout() -> Layout {
        Layout {
            rows: [0u32; TABLE_COUNT],
            wide_string: false,
            wide_guid: false,
            wide_blob: false,
        }
    }

    #[test]
    fn test_narrow_row_sizes() {
        let layout = empty_layout();
        // Module: generation(2) + name(2) + 3 guids(2 each).
        assert_eq!(layout.row_size(MODULE).unwrap(), 10);
        // TypeRef: scope(2) + name(2) + namespace(2).
        assert_eq!(layout.row_size(TYPE_REF).unwrap(), 6);
        // MemberRef: parent(2) + name(2) + signature(2).
        assert_eq!(layout.row_size(MEMBER_REF).unwrap(), 6);
        // AssemblyRef: 4 version words + flags + key + name + culture + hash.
        assert_eq!(layout.row_size(ASSEMBLY_REF).unwrap(), 20);
    }

    #[test]
    fn test_wide_heap_row_sizes() {
        let mut layout = empty_layout();
        layout.wide_string = true;
        layout.wide_blob = true;
        assert_eq!(layout.row_size(TYPE_REF).unwrap(), 10);
        assert_eq!(layout.row_size(MEMBER_REF).unwrap(), 10);
    }

    #[test]
    fn test_coded_index_goes_wide_with_many_rows() {
        let mut layout = empty_layout();
        assert!(!layout.coded_wide(RESOLUTION_SCOPE));
        // ResolutionScope has 2 tag bits: wide at 2^14 rows in any member.
        layout.rows[TYPE_REF] = 1 << 14;
        assert!(layout.coded_wide(RESOLUTION_SCOPE));
    }

    #[test]
    fn test_coded_decode() {
        // Tag 2 (AssemblyRef) with row 3: (3 << 2) | 2.
        let (tag, index) = decode_coded((3 << 2) | 2, RESOLUTION_SCOPE).unwrap();
        assert_eq!(tag, 2);
        assert_eq!(index, 3);
    }

    #[test]
    fn test_unknown_table_rejected() {
        let layout = empty_layout();
        assert!(layout.row_size(0x2F).is_err());
    }
}
