//! Member and type signature blob decoding (ECMA-335 II.23.2).
//!
//! Decoded types are rendered in the XML documentation-comment form used by
//! document identifiers: `@` for byref, `*` for pointers, `[]`/`[0:,0:]` for
//! arrays and `{...}` for generic instantiations.

use crate::metadata::cursor::Cursor;
use crate::metadata::error::{MetadataError, Result};

const ELEMENT_TYPE_VOID: u8 = 0x01;
const ELEMENT_TYPE_BOOLEAN: u8 = 0x02;
const ELEMENT_TYPE_CHAR: u8 = 0x03;
const ELEMENT_TYPE_I1: u8 = 0x04;
const ELEMENT_TYPE_U1: u8 = 0x05;
const ELEMENT_TYPE_I2: u8 = 0x06;
const ELEMENT_TYPE_U2: u8 = 0x07;
const ELEMENT_TYPE_I4: u8 = 0x08;
const ELEMENT_TYPE_U4: u8 = 0x09;
const ELEMENT_TYPE_I8: u8 = 0x0A;
const ELEMENT_TYPE_U8: u8 = 0x0B;
const ELEMENT_TYPE_R4: u8 = 0x0C;
const ELEMENT_TYPE_R8: u8 = 0x0D;
const ELEMENT_TYPE_STRING: u8 = 0x0E;
const ELEMENT_TYPE_PTR: u8 = 0x0F;
const ELEMENT_TYPE_BYREF: u8 = 0x10;
const ELEMENT_TYPE_VALUETYPE: u8 = 0x11;
const ELEMENT_TYPE_CLASS: u8 = 0x12;
const ELEMENT_TYPE_VAR: u8 = 0x13;
const ELEMENT_TYPE_ARRAY: u8 = 0x14;
const ELEMENT_TYPE_GENERICINST: u8 = 0x15;
const ELEMENT_TYPE_TYPEDBYREF: u8 = 0x16;
const ELEMENT_TYPE_I: u8 = 0x18;
const ELEMENT_TYPE_U: u8 = 0x19;
const ELEMENT_TYPE_FNPTR: u8 = 0x1B;
const ELEMENT_TYPE_OBJECT: u8 = 0x1C;
const ELEMENT_TYPE_SZARRAY: u8 = 0x1D;
const ELEMENT_TYPE_MVAR: u8 = 0x1E;
const ELEMENT_TYPE_CMOD_REQD: u8 = 0x1F;
const ELEMENT_TYPE_CMOD_OPT: u8 = 0x20;
const ELEMENT_TYPE_SENTINEL: u8 = 0x41;
const ELEMENT_TYPE_PINNED: u8 = 0x45;

const SIG_GENERIC: u8 = 0x10;
const SIG_KIND_FIELD: u8 = 0x6;
const SIG_KIND_PROPERTY: u8 = 0x8;

/// Resolves a compressed TypeDefOrRef token to a full dotted type name.
pub type TypeNameResolver<'r> = dyn Fn(u32) -> Result<String> + 'r;

/// Kind of member a MemberRef signature describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    Property,
}

impl MemberKind {
    /// Doc-id prefix letter for this member kind.
    pub fn doc_prefix(&self) -> char {
        match self {
            Self::Field => 'F',
            Self::Method => 'M',
            Self::Property => 'P',
        }
    }
}

/// Classify a member signature blob by its leading calling-convention byte.
pub fn classify(blob: &[u8]) -> Result<MemberKind> {
    let first = *blob
        .first()
        .ok_or_else(|| MetadataError::format("empty member signature"))?;
    Ok(match first & 0x0F {
        SIG_KIND_FIELD => MemberKind::Field,
        SIG_KIND_PROPERTY => MemberKind::Property,
        _ => MemberKind::Method,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    /// Generic parameter count; `0` for non-generic methods.
    pub generic_arity: u32,
    /// Parameter types rendered in doc-id form.
    pub params: Vec<String>,
}

/// Decode a MethodRef signature into arity and rendered parameter types.
pub fn parse_method(blob: &[u8], resolver: &TypeNameResolver<'_>) -> Result<MethodSignature> {
    let mut cursor = Cursor::new(blob);
    let convention = cursor.read_u8()?;
    let generic_arity = if convention & SIG_GENERIC != 0 {
        cursor.read_compressed_u32()?
    } else {
        0
    };
    let param_count = cursor.read_compressed_u32()?;

    // Return type is parsed for cursor position only; doc ids do not carry it.
    let _return_type = parse_type(&mut cursor, resolver)?;

    let mut params = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        if peek(&cursor)? == Some(ELEMENT_TYPE_SENTINEL) {
            cursor.skip(1)?;
        }
        params.push(parse_type(&mut cursor, resolver)?);
    }

    Ok(MethodSignature {
        generic_arity,
        params,
    })
}

/// Decode a TypeSpec blob to the full name of its primary named type.
///
/// Generic instantiations resolve to the open generic type, matching how
/// doc ids name members of constructed types.
pub fn parse_type_spec(blob: &[u8], resolver: &TypeNameResolver<'_>) -> Result<String> {
    let mut cursor = Cursor::new(blob);
    skip_modifiers(&mut cursor)?;
    let element = peek(&cursor)?.ok_or_else(|| MetadataError::format("empty TypeSpec"))?;
    match element {
        ELEMENT_TYPE_GENERICINST => {
            cursor.skip(2)?; // GENERICINST + CLASS/VALUETYPE
            let token = cursor.read_compressed_u32()?;
            resolver(token)
        }
        ELEMENT_TYPE_CLASS | ELEMENT_TYPE_VALUETYPE => {
            cursor.skip(1)?;
            let token = cursor.read_compressed_u32()?;
            resolver(token)
        }
        _ => parse_type(&mut cursor, resolver),
    }
}

/// The TypeDefOrRef token of a TypeSpec's primary named type, when it has one.
///
/// Array-of-primitive and generic-parameter specs have no named type and
/// yield `None`.
pub fn type_spec_primary_token(blob: &[u8]) -> Result<Option<u32>> {
    let mut cursor = Cursor::new(blob);
    skip_modifiers(&mut cursor)?;
    match peek(&cursor)? {
        Some(ELEMENT_TYPE_GENERICINST) => {
            cursor.skip(2)?;
            Ok(Some(cursor.read_compressed_u32()?))
        }
        Some(ELEMENT_TYPE_CLASS) | Some(ELEMENT_TYPE_VALUETYPE) => {
            cursor.skip(1)?;
            Ok(Some(cursor.read_compressed_u32()?))
        }
        _ => Ok(None),
    }
}

fn peek(cursor: &Cursor<'_>) -> Result<Option<u8>> {
    let mut probe = cursor.clone();
    Ok(probe.read_u8().ok())
}

fn skip_modifiers(cursor: &mut Cursor<'_>) -> Result<()> {
    while let Some(byte) = peek(cursor)? {
        match byte {
            ELEMENT_TYPE_CMOD_REQD | ELEMENT_TYPE_CMOD_OPT => {
                cursor.skip(1)?;
                cursor.read_compressed_u32()?;
            }
            ELEMENT_TYPE_PINNED => {
                cursor.skip(1)?;
            }
            _ => break,
        }
    }
    Ok(())
}

fn parse_type(cursor: &mut Cursor<'_>, resolver: &TypeNameResolver<'_>) -> Result<String> {
    skip_modifiers(cursor)?;
    let element = cursor.read_u8()?;
    let rendered = match element {
        ELEMENT_TYPE_VOID => "System.Void".to_string(),
        ELEMENT_TYPE_BOOLEAN => "System.Boolean".to_string(),
        ELEMENT_TYPE_CHAR => "System.Char".to_string(),
        ELEMENT_TYPE_I1 => "System.SByte".to_string(),
        ELEMENT_TYPE_U1 => "System.Byte".to_string(),
        ELEMENT_TYPE_I2 => "System.Int16".to_string(),
        ELEMENT_TYPE_U2 => "System.UInt16".to_string(),
        ELEMENT_TYPE_I4 => "System.Int32".to_string(),
        ELEMENT_TYPE_U4 => "System.UInt32".to_string(),
        ELEMENT_TYPE_I8 => "System.Int64".to_string(),
        ELEMENT_TYPE_U8 => "System.UInt64".to_string(),
        ELEMENT_TYPE_R4 => "System.Single".to_string(),
        ELEMENT_TYPE_R8 => "System.Double".to_string(),
        ELEMENT_TYPE_STRING => "System.String".to_string(),
        ELEMENT_TYPE_TYPEDBYREF => "System.TypedReference".to_string(),
        ELEMENT_TYPE_I => "System.IntPtr".to_string(),
        ELEMENT_TYPE_U => "System.UIntPtr".to_string(),
        ELEMENT_TYPE_OBJECT => "System.Object".to_string(),
        ELEMENT_TYPE_PTR => format!("{}*", parse_type(cursor, resolver)?),
        ELEMENT_TYPE_BYREF => format!("{}@", parse_type(cursor, resolver)?),
        ELEMENT_TYPE_CLASS | ELEMENT_TYPE_VALUETYPE => {
            let token = cursor.read_compressed_u32()?;
            resolver(token)?
        }
        ELEMENT_TYPE_VAR => format!("`{}", cursor.read_compressed_u32()?),
        ELEMENT_TYPE_MVAR => format!("``{}", cursor.read_compressed_u32()?),
        ELEMENT_TYPE_SZARRAY => format!("{}[]", parse_type(cursor, resolver)?),
        ELEMENT_TYPE_ARRAY => {
            let base = parse_type(cursor, resolver)?;
            let rank = cursor.read_compressed_u32()?;
            let size_count = cursor.read_compressed_u32()?;
            for _ in 0..size_count {
                cursor.read_compressed_u32()?;
            }
            let lobound_count = cursor.read_compressed_u32()?;
            for _ in 0..lobound_count {
                cursor.read_compressed_u32()?;
            }
            let dims = vec!["0:"; rank.max(1) as usize].join(",");
            format!("{base}[{dims}]")
        }
        ELEMENT_TYPE_GENERICINST => {
            let kind = cursor.read_u8()?;
            if kind != ELEMENT_TYPE_CLASS && kind != ELEMENT_TYPE_VALUETYPE {
                return Err(MetadataError::format("malformed generic instantiation"));
            }
            let token = cursor.read_compressed_u32()?;
            let base = strip_arity(&resolver(token)?);
            let arg_count = cursor.read_compressed_u32()?;
            let mut args = Vec::with_capacity(arg_count as usize);
            for _ in 0..arg_count {
                args.push(parse_type(cursor, resolver)?);
            }
            format!("{base}{{{}}}", args.join(","))
        }
        ELEMENT_TYPE_FNPTR => {
            // Parse the nested method signature to keep the cursor aligned.
            let convention = cursor.read_u8()?;
            if convention & SIG_GENERIC != 0 {
                cursor.read_compressed_u32()?;
            }
            let param_count = cursor.read_compressed_u32()?;
            parse_type(cursor, resolver)?;
            for _ in 0..param_count {
                if peek(cursor)? == Some(ELEMENT_TYPE_SENTINEL) {
                    cursor.skip(1)?;
                }
                parse_type(cursor, resolver)?;
            }
            "fnptr".to_string()
        }
        other => {
            return Err(MetadataError::format(format!(
                "unsupported element type 0x{other:02x} in signature"
            )))
        }
    };
    Ok(rendered)
}

/// Drop a trailing `` `n `` arity suffix from a generic type name.
fn strip_arity(name: &str) -> String {
    match name.rfind('`') {
        Some(pos) if name[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
            name[..pos].to_string()
        }
        _ => name.to_string(),
    }
}
