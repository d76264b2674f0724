//! Serializable descriptions of C types.
//!
//! A [`TypeDescriptor`] graph is the thing every other component marshals
//! against: the [marshaller](crate::marshaller) walks it to encode/decode
//! argument values, the [memory sync compiler](crate::memsync) walks it to
//! resolve paths, and the [library proxy](crate::library) attaches one to
//! every bound symbol argument and return slot.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Maximum depth a `TypeDescriptor` graph may nest before we conclude it's
/// unsupported. The data model is a tree, not a general graph (pointer
/// *identity* is never preserved across the boundary — see the module docs
/// for [`crate::marshaller`]), so a well-formed descriptor should never come
/// close to this.
const MAX_DEPTH: usize = 64;

/// The fixed set of primitive C types the bridge understands, each with a
/// known byte width and signedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// 8-bit C `char`.
    Char,
    /// UTF-16 `wchar_t` as used on Windows.
    WChar,
}

impl PrimitiveKind {
    pub const fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool | Self::Char => 1,
            Self::I16 | Self::U16 | Self::WChar => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub const fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }
}

/// Whether a pointer argument is read by the callee, written by the callee,
/// or both, for the *immediate* pointer value (this is independent of
/// whether a [`crate::memsync::MemSyncDirective`] names it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerDirection {
    In,
    Out,
    InOut,
}

/// Struct/union packing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packing {
    /// Fields are laid out at their natural alignment (the platform ABI
    /// default).
    Natural,
    /// Fields are packed with the given maximum alignment override (as in
    /// `#pragma pack(n)`).
    Packed(u8),
}

/// How a union's active member is determined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Discriminant {
    /// No tag is tracked; the union's size is the max of its members and
    /// any member may be read back.
    Untagged,
    /// An external integer field (named elsewhere in the enclosing struct)
    /// selects the active member by index.
    Tagged { field_name: String },
}

/// A named field in a struct or union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// A recursive description of a C type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    /// `void*` — a pointer with no known pointee type.
    Opaque,
    Pointer {
        inner: Box<TypeDescriptor>,
        direction: PointerDirection,
    },
    Array {
        inner: Box<TypeDescriptor>,
        len: std::num::NonZeroUsize,
    },
    Struct {
        fields: Vec<Field>,
        packing: Packing,
    },
    Union {
        fields: Vec<Field>,
        discriminant: Discriminant,
    },
    Funcptr {
        argtypes: Vec<TypeDescriptor>,
        restype: Box<TypeDescriptor>,
        convention: crate::types::Convention,
        use_errno: bool,
        use_last_error: bool,
    },
}

impl TypeDescriptor {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::Primitive(kind)
    }

    pub fn pointer(inner: TypeDescriptor, direction: PointerDirection) -> Self {
        Self::Pointer {
            inner: Box::new(inner),
            direction,
        }
    }

    pub fn opaque_pointer(direction: PointerDirection) -> Self {
        Self::Pointer {
            inner: Box::new(Self::Opaque),
            direction,
        }
    }

    pub fn array(inner: TypeDescriptor, len: usize) -> Result<Self> {
        let len = std::num::NonZeroUsize::new(len).ok_or_else(|| BridgeError::BadType {
            reason: "array length must be positive".into(),
        })?;
        Ok(Self::Array {
            inner: Box::new(inner),
            len,
        })
    }

    pub fn struct_of(fields: Vec<Field>, packing: Packing) -> Self {
        Self::Struct { fields, packing }
    }

    pub fn union_of(fields: Vec<Field>, discriminant: Discriminant) -> Self {
        Self::Union {
            fields,
            discriminant,
        }
    }

    pub fn funcptr(
        argtypes: Vec<TypeDescriptor>,
        restype: TypeDescriptor,
        convention: crate::types::Convention,
        use_errno: bool,
        use_last_error: bool,
    ) -> Self {
        Self::Funcptr {
            argtypes,
            restype: Box::new(restype),
            convention,
            use_errno,
            use_last_error,
        }
    }

    /// Validates that the graph is finite/acyclic-by-construction (the depth
    /// guard is what actually protects us, since `TypeDescriptor` values are
    /// owned trees and can't literally cycle) and every nested type resolves.
    pub fn validate(&self) -> Result<()> {
        self.validate_at_depth(0)
    }

    fn validate_at_depth(&self, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(BridgeError::BadType {
                reason: "type descriptor nests too deeply (possible cycle)".into(),
            });
        }
        match self {
            Self::Primitive(_) | Self::Opaque => Ok(()),
            Self::Pointer { inner, .. } => inner.validate_at_depth(depth + 1),
            Self::Array { inner, .. } => inner.validate_at_depth(depth + 1),
            Self::Struct { fields, .. } | Self::Union { fields, .. } => {
                for f in fields {
                    f.ty.validate_at_depth(depth + 1)?;
                }
                Ok(())
            }
            Self::Funcptr {
                argtypes, restype, ..
            } => {
                for a in argtypes {
                    a.validate_at_depth(depth + 1)?;
                }
                restype.validate_at_depth(depth + 1)
            }
        }
    }

    /// Size in bytes, obeying the chosen packing rule for aggregates.
    pub fn size_of(&self) -> Result<usize> {
        match self {
            Self::Primitive(p) => Ok(p.width()),
            Self::Opaque => Ok(std::mem::size_of::<usize>()),
            Self::Pointer { .. } | Self::Funcptr { .. } => Ok(std::mem::size_of::<usize>()),
            Self::Array { inner, len } => Ok(inner.size_of()? * len.get()),
            Self::Struct { .. } => Ok(self.field_offsets()?.total_size),
            Self::Union { fields, .. } => {
                let mut max = 0usize;
                for f in fields {
                    max = max.max(f.ty.size_of()?);
                }
                Ok(max)
            }
        }
    }

    /// Alignment in bytes.
    pub fn align_of(&self) -> Result<usize> {
        match self {
            Self::Primitive(p) => Ok(p.width()),
            Self::Opaque | Self::Pointer { .. } | Self::Funcptr { .. } => {
                Ok(std::mem::size_of::<usize>())
            }
            Self::Array { inner, .. } => inner.align_of(),
            Self::Struct { fields, packing } => {
                let cap = match packing {
                    Packing::Natural => usize::MAX,
                    Packing::Packed(n) => *n as usize,
                };
                let mut align = 1usize;
                for f in fields {
                    align = align.max(f.ty.align_of()?.min(cap));
                }
                Ok(align.max(1))
            }
            Self::Union { fields, .. } => {
                let mut align = 1usize;
                for f in fields {
                    align = align.max(f.ty.align_of()?);
                }
                Ok(align)
            }
        }
    }

    /// Computes byte offsets for every field of a struct, obeying the
    /// packing rule (natural alignment by default, an explicit cap
    /// otherwise). Only meaningful for [`TypeDescriptor::Struct`]; unions
    /// place every field at offset 0.
    pub fn field_offsets(&self) -> Result<FieldLayout> {
        match self {
            Self::Struct { fields, packing } => {
                let cap = match packing {
                    Packing::Natural => usize::MAX,
                    Packing::Packed(n) => *n as usize,
                };
                let mut offset = 0usize;
                let mut struct_align = 1usize;
                let mut offsets = Vec::with_capacity(fields.len());
                for f in fields {
                    let falign = f.ty.align_of()?.min(cap).max(1);
                    offset = align_up(offset, falign);
                    offsets.push((f.name.clone(), offset));
                    offset += f.ty.size_of()?;
                    struct_align = struct_align.max(falign);
                }
                let total_size = align_up(offset, struct_align).max(offset);
                Ok(FieldLayout {
                    offsets,
                    total_size,
                })
            }
            Self::Union { fields, .. } => {
                let mut total_size = 0usize;
                let offsets = fields
                    .iter()
                    .map(|f| (f.name.clone(), 0usize))
                    .collect::<Vec<_>>();
                for f in fields {
                    total_size = total_size.max(f.ty.size_of()?);
                }
                Ok(FieldLayout {
                    offsets,
                    total_size,
                })
            }
            _ => Err(BridgeError::BadType {
                reason: "field_offsets is only defined for struct/union types".into(),
            }),
        }
    }

    pub fn field(&self, name: &str) -> Option<&TypeDescriptor> {
        match self {
            Self::Struct { fields, .. } | Self::Union { fields, .. } => {
                fields.iter().find(|f| f.name == name).map(|f| &f.ty)
            }
            _ => None,
        }
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        return offset;
    }
    offset.div_ceil(align) * align
}

/// Resolved field offsets plus the struct/union's total size.
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub offsets: Vec<(String, usize)>,
    pub total_size: usize,
}

impl FieldLayout {
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.offsets
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| *o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_widths() {
        assert_eq!(PrimitiveKind::I64.width(), 8);
        assert_eq!(PrimitiveKind::Bool.width(), 1);
    }

    #[test]
    fn struct_natural_packing_inserts_padding() {
        let ty = TypeDescriptor::struct_of(
            vec![
                Field {
                    name: "a".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I8),
                },
                Field {
                    name: "b".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I32),
                },
            ],
            Packing::Natural,
        );
        let layout = ty.field_offsets().unwrap();
        assert_eq!(layout.offset_of("a"), Some(0));
        assert_eq!(layout.offset_of("b"), Some(4));
        assert_eq!(layout.total_size, 8);
    }

    #[test]
    fn struct_packed_has_no_padding() {
        let ty = TypeDescriptor::struct_of(
            vec![
                Field {
                    name: "a".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I8),
                },
                Field {
                    name: "b".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I32),
                },
            ],
            Packing::Packed(1),
        );
        let layout = ty.field_offsets().unwrap();
        assert_eq!(layout.offset_of("b"), Some(1));
        assert_eq!(layout.total_size, 5);
    }

    #[test]
    fn union_size_is_max_member() {
        let ty = TypeDescriptor::union_of(
            vec![
                Field {
                    name: "small".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I8),
                },
                Field {
                    name: "big".into(),
                    ty: TypeDescriptor::primitive(PrimitiveKind::I64),
                },
            ],
            Discriminant::Untagged,
        );
        assert_eq!(ty.size_of().unwrap(), 8);
    }

    #[test]
    fn rejects_zero_length_array() {
        let err = TypeDescriptor::array(TypeDescriptor::primitive(PrimitiveKind::I32), 0);
        assert!(matches!(err, Err(BridgeError::BadType { .. })));
    }
}
