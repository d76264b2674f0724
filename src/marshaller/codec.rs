//! Primitive value <-> byte pattern codec shared by pack and unpack.
//!
//! Integer widths are fixed by the [`TypeDescriptor`], never inferred from
//! the host; signed conversions use two's complement with wraparound.
//! Floating values are transported as their IEEE-754 bit patterns. Booleans
//! transport as a single byte (0 / non-zero).

use crate::argtree::{ArgumentTree, Sentinel, Value};
use crate::error::{BridgeError, Result};
use crate::types::{Field, PrimitiveKind, TypeDescriptor};
use crate::wire::ByteBlob;
use scroll::{Pread, Pwrite, NATIVE};

/// Encodes a primitive [`Value`] into its raw byte pattern.
pub fn encode_primitive(value: &Value, kind: PrimitiveKind) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; kind.width()];
    match (value, kind) {
        (Value::I8(v), PrimitiveKind::I8) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::I16(v), PrimitiveKind::I16) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::I32(v), PrimitiveKind::I32) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::I64(v), PrimitiveKind::I64) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::U8(v), PrimitiveKind::U8) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::U16(v), PrimitiveKind::U16) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::U32(v), PrimitiveKind::U32) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::U64(v), PrimitiveKind::U64) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::F32(v), PrimitiveKind::F32) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::F64(v), PrimitiveKind::F64) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::Bool(v), PrimitiveKind::Bool) => buf.pwrite_with::<u8>(if *v { 1 } else { 0 }, 0, NATIVE),
        (Value::Char(v), PrimitiveKind::Char) => buf.pwrite_with(*v, 0, NATIVE),
        (Value::WChar(v), PrimitiveKind::WChar) => buf.pwrite_with(*v, 0, NATIVE),
        _ => {
            return Err(BridgeError::TypeMismatch {
                path: "<primitive>".into(),
                expected: format!("{kind:?}"),
            })
        }
    }
    .map_err(|e| BridgeError::Wire {
        source: serde_json::Error::io(std::io::Error::other(e.to_string())),
    })?;
    Ok(buf)
}

/// Decodes a raw byte pattern back into a [`Value`] of the given kind.
pub fn decode_primitive(bytes: &[u8], kind: PrimitiveKind) -> Result<Value> {
    if bytes.len() < kind.width() {
        return Err(BridgeError::ShortMemory {
            pointer_id: 0,
            actual: bytes.len(),
            needed: kind.width(),
        });
    }
    let to_io = |e: scroll::Error| BridgeError::Wire {
        source: serde_json::Error::io(std::io::Error::other(e.to_string())),
    };
    Ok(match kind {
        PrimitiveKind::I8 => Value::I8(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::I16 => Value::I16(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::I32 => Value::I32(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::I64 => Value::I64(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::U8 => Value::U8(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::U16 => Value::U16(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::U32 => Value::U32(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::U64 => Value::U64(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::F32 => Value::F32(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::F64 => Value::F64(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::Bool => {
            let raw: u8 = bytes.pread_with(0, NATIVE).map_err(to_io)?;
            Value::Bool(raw != 0)
        }
        PrimitiveKind::Char => Value::Char(bytes.pread_with(0, NATIVE).map_err(to_io)?),
        PrimitiveKind::WChar => Value::WChar(bytes.pread_with(0, NATIVE).map_err(to_io)?),
    })
}

/// Encodes a concrete [`Value`] into its wire [`ArgumentTree`] form, walking
/// `ty` in lockstep. Pointer-typed slots are *not* handled here — callers
/// (the forward/return pack logic) substitute the `Sentinel` themselves,
/// since that requires allocating a fresh [`crate::argtree::PointerId`].
pub fn encode_value(value: &Value, ty: &TypeDescriptor) -> Result<ArgumentTree> {
    match (value, ty) {
        (Value::Pointer(None), TypeDescriptor::Pointer { .. } | TypeDescriptor::Opaque) => {
            Ok(ArgumentTree::Pointer(Sentinel::Null))
        }
        (Value::Pointer(Some(id)), TypeDescriptor::Pointer { .. } | TypeDescriptor::Opaque) => {
            Ok(ArgumentTree::Pointer(Sentinel::NonNull(*id)))
        }
        (Value::Callback(handle), TypeDescriptor::Funcptr { .. }) => {
            Ok(ArgumentTree::Callback(*handle))
        }
        (Value::Array(items), TypeDescriptor::Array { inner, len }) => {
            if items.len() != len.get() {
                return Err(BridgeError::TypeMismatch {
                    path: "<array>".into(),
                    expected: format!("array of length {}", len.get()),
                });
            }
            let encoded = items
                .iter()
                .map(|v| encode_value(v, inner))
                .collect::<Result<Vec<_>>>()?;
            Ok(ArgumentTree::Array(encoded))
        }
        (Value::Struct(fields), TypeDescriptor::Struct { fields: decl, .. }) => {
            encode_fields(fields, decl)
        }
        (Value::Union { active, value }, TypeDescriptor::Union { fields, .. }) => {
            let field_ty = fields
                .iter()
                .find(|f| &f.name == active)
                .map(|f| &f.ty)
                .ok_or_else(|| BridgeError::TypeMismatch {
                    path: active.clone(),
                    expected: "a declared union member".into(),
                })?;
            Ok(ArgumentTree::Union {
                active: active.clone(),
                value: Box::new(encode_value(value, field_ty)?),
            })
        }
        (value, TypeDescriptor::Primitive(kind)) => {
            Ok(ArgumentTree::Primitive(ByteBlob::new(encode_primitive(value, *kind)?)))
        }
        _ => Err(BridgeError::TypeMismatch {
            path: "<value>".into(),
            expected: format!("{ty:?}"),
        }),
    }
}

fn encode_fields(fields: &[(String, Value)], decl: &[Field]) -> Result<ArgumentTree> {
    let mut out = Vec::with_capacity(decl.len());
    for f in decl {
        let (_, v) = fields
            .iter()
            .find(|(n, _)| n == &f.name)
            .ok_or_else(|| BridgeError::TypeMismatch {
                path: f.name.clone(),
                expected: "a present struct field".into(),
            })?;
        out.push((f.name.clone(), encode_value(v, &f.ty)?));
    }
    Ok(ArgumentTree::Struct(out))
}

/// Decodes a wire [`ArgumentTree`] node back into a concrete [`Value`],
/// against the declared `TypeDescriptor`. Fails with `TypeMismatch` when
/// the node shape is incompatible with the descriptor.
pub fn decode_value(tree: &ArgumentTree, ty: &TypeDescriptor) -> Result<Value> {
    match (tree, ty) {
        (ArgumentTree::Pointer(Sentinel::Null), TypeDescriptor::Pointer { .. } | TypeDescriptor::Opaque) => {
            Ok(Value::Pointer(None))
        }
        (ArgumentTree::Pointer(Sentinel::NonNull(id)), TypeDescriptor::Pointer { .. } | TypeDescriptor::Opaque) => {
            Ok(Value::Pointer(Some(*id)))
        }
        (ArgumentTree::Callback(handle), TypeDescriptor::Funcptr { .. }) => Ok(Value::Callback(*handle)),
        (ArgumentTree::Array(items), TypeDescriptor::Array { inner, len }) => {
            if items.len() != len.get() {
                return Err(BridgeError::TypeMismatch {
                    path: "<array>".into(),
                    expected: format!("array of length {}", len.get()),
                });
            }
            let decoded = items
                .iter()
                .map(|v| decode_value(v, inner))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(decoded))
        }
        (ArgumentTree::Struct(items), TypeDescriptor::Struct { fields: decl, .. }) => {
            decode_fields(items, decl)
        }
        (ArgumentTree::Union { active, value }, TypeDescriptor::Union { fields, .. }) => {
            let field_ty = fields
                .iter()
                .find(|f| &f.name == active)
                .map(|f| &f.ty)
                .ok_or_else(|| BridgeError::TypeMismatch {
                    path: active.clone(),
                    expected: "a declared union member".into(),
                })?;
            Ok(Value::Union {
                active: active.clone(),
                value: Box::new(decode_value(value, field_ty)?),
            })
        }
        (ArgumentTree::Primitive(bytes), TypeDescriptor::Primitive(kind)) => {
            decode_primitive(bytes.as_slice(), *kind)
        }
        _ => Err(BridgeError::TypeMismatch {
            path: "<value>".into(),
            expected: format!("{ty:?}"),
        }),
    }
}

fn decode_fields(items: &[(String, ArgumentTree)], decl: &[Field]) -> Result<Value> {
    let mut out = Vec::with_capacity(decl.len());
    for f in decl {
        let (_, node) = items
            .iter()
            .find(|(n, _)| n == &f.name)
            .ok_or_else(|| BridgeError::TypeMismatch {
                path: f.name.clone(),
                expected: "a present struct field".into(),
            })?;
        out.push((f.name.clone(), decode_value(node, &f.ty)?));
    }
    Ok(Value::Struct(out))
}
