//! Declarative memory-synchronization directives.
//!
//! A [`MemSyncDirective`] names, for one call site, a pointer argument that
//! reaches additional caller memory, how many elements it reaches, and
//! where to find that count. Directives are validated and compiled once,
//! when a symbol is bound (see [`crate::library::proxy`]), into a
//! [`CompiledMemSync`] that the [marshaller](crate::marshaller) evaluates on
//! every call without re-walking the declared argument types.
//!
//! Scope note: a path may step into struct fields to find a *length*, but
//! the pointer itself (`path`) must resolve to a whole top-level argument —
//! a pointer nested inside a struct field is not resolved to caller memory
//! by this compiler. See `DESIGN.md` for why.

use crate::error::{BridgeError, Result};
use crate::types::TypeDescriptor;
use serde::{Deserialize, Serialize};

/// One step while walking from an argument list down into a (possibly
/// nested) leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathStep {
    /// Selects argument `index` (0-based) from the call's argument list.
    Argument(usize),
    /// Selects a named field of the current struct/union.
    Field(String),
}

/// A path is a non-empty sequence of steps rooted at the argument list,
/// e.g. `[Argument(2), Field("buf")]` for "argument 2, field `buf`".
pub type Path = Vec<PathStep>;

/// A memory-synchronization directive as declared by the caller at
/// symbol-binding time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemSyncDirective {
    pub path: Path,
    pub length_path: Path,
    pub element_type: TypeDescriptor,
    pub null_ok: bool,
}

/// A validated directive: the argument index the pointer lives at (per the
/// scope note above, `path` must resolve to exactly one top-level
/// argument), the length path to re-evaluate on every call, the element
/// type/width, and the `null_ok` flag.
#[derive(Debug, Clone)]
pub struct CompiledMemSync {
    pub argument_index: usize,
    pub length_path: Path,
    pub element_type: TypeDescriptor,
    pub element_width: usize,
    pub null_ok: bool,
}

/// The largest number of bytes a single memsync directive may reach in one
/// call. Chosen generously; real deployments would make this configurable
/// via [`crate::config::Config`].
pub const DEFAULT_MEMORY_CAP: usize = 64 * 1024 * 1024;

impl MemSyncDirective {
    /// Validates `self.path`/`self.length_path` against the symbol's
    /// declared argument types and compiles it into a [`CompiledMemSync`].
    ///
    /// Fails with `BadMemsync` when a path does not resolve, when
    /// `length_path` points to a non-integer leaf, or when `element_type`'s
    /// width is zero.
    pub fn compile(&self, argtypes: &[TypeDescriptor]) -> Result<CompiledMemSync> {
        let argument_index = match self.path.first() {
            Some(PathStep::Argument(i)) => *i,
            _ => {
                return Err(BridgeError::BadMemsync {
                    reason: "path must start by selecting an argument".into(),
                })
            }
        };
        if self.path.len() != 1 {
            return Err(BridgeError::BadMemsync {
                reason: "path must resolve to a whole argument, not a nested field".into(),
            });
        }
        let pointee = resolve_type(argtypes, &self.path)?;
        if !matches!(pointee, TypeDescriptor::Pointer { .. } | TypeDescriptor::Opaque) {
            return Err(BridgeError::BadMemsync {
                reason: format!("path {:?} does not resolve to a pointer", self.path),
            });
        }

        let length_leaf = resolve_type(argtypes, &self.length_path)?;
        let is_integer = matches!(length_leaf, TypeDescriptor::Primitive(p) if p.is_integer());
        if !is_integer {
            return Err(BridgeError::BadMemsync {
                reason: format!("length_path {:?} does not resolve to an integer", self.length_path),
            });
        }

        let element_width = self.element_type.size_of()?;
        if element_width == 0 {
            return Err(BridgeError::BadMemsync {
                reason: "element_type has zero width".into(),
            });
        }

        Ok(CompiledMemSync {
            argument_index,
            length_path: self.length_path.clone(),
            element_type: self.element_type.clone(),
            element_width,
            null_ok: self.null_ok,
        })
    }
}

/// Walks `path` against the declared argument types, returning the
/// `TypeDescriptor` at the end of the walk.
fn resolve_type<'a>(argtypes: &'a [TypeDescriptor], path: &[PathStep]) -> Result<&'a TypeDescriptor> {
    let mut steps = path.iter();
    let first = steps.next().ok_or_else(|| BridgeError::BadMemsync {
        reason: "path is empty".into(),
    })?;
    let PathStep::Argument(index) = first else {
        return Err(BridgeError::BadMemsync {
            reason: "path must start by selecting an argument".into(),
        });
    };
    let mut current = argtypes.get(*index).ok_or_else(|| BridgeError::BadMemsync {
        reason: format!("argument index {index} out of range"),
    })?;
    for step in steps {
        match step {
            PathStep::Argument(_) => {
                return Err(BridgeError::BadMemsync {
                    reason: "only the first path step may select an argument".into(),
                })
            }
            PathStep::Field(name) => {
                current = current.field(name).ok_or_else(|| BridgeError::BadMemsync {
                    reason: format!("no field named {name:?} in {current:?}"),
                })?;
            }
        }
    }
    Ok(current)
}

/// Resolves an integer-valued leaf reached by `path` against the *live*
/// argument list for one call, returning it as a non-negative `usize`.
///
/// This mirrors `resolve_type` but walks [`crate::argtree::Value`]s instead
/// of `TypeDescriptor`s, since the length may change from call to call.
pub fn resolve_length(
    args: &[crate::argtree::Value],
    path: &[PathStep],
) -> Result<usize> {
    use crate::argtree::Value;

    let PathStep::Argument(index) = path.first().ok_or_else(|| BridgeError::BadMemsync {
        reason: "length_path is empty".into(),
    })?
    else {
        return Err(BridgeError::BadMemsync {
            reason: "length_path must start by selecting an argument".into(),
        });
    };
    let mut current = args.get(*index).ok_or_else(|| BridgeError::BadMemsync {
        reason: format!("argument index {index} out of range"),
    })?;
    for step in &path[1..] {
        let PathStep::Field(name) = step else {
            return Err(BridgeError::BadMemsync {
                reason: "only the first path step may select an argument".into(),
            });
        };
        let Value::Struct(fields) = current else {
            return Err(BridgeError::BadMemsync {
                reason: format!("{name} is not a field of a struct value"),
            });
        };
        current = &fields
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| BridgeError::BadMemsync {
                reason: format!("no field named {name:?}"),
            })?
            .1;
    }

    let n: i128 = match current {
        Value::I8(v) => *v as i128,
        Value::I16(v) => *v as i128,
        Value::I32(v) => *v as i128,
        Value::I64(v) => *v as i128,
        Value::U8(v) => *v as i128,
        Value::U16(v) => *v as i128,
        Value::U32(v) => *v as i128,
        Value::U64(v) => *v as i128,
        _ => {
            return Err(BridgeError::BadMemsync {
                reason: "length_path leaf is not an integer value".into(),
            })
        }
    };
    if n < 0 {
        return Err(BridgeError::BadMemsync {
            reason: "length_path resolved to a negative value".into(),
        });
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, Packing, PointerDirection, PrimitiveKind};

    #[test]
    fn compiles_simple_buffer_directive() {
        let argtypes = vec![
            TypeDescriptor::pointer(
                TypeDescriptor::primitive(PrimitiveKind::I16),
                PointerDirection::InOut,
            ),
            TypeDescriptor::primitive(PrimitiveKind::I16),
        ];
        let directive = MemSyncDirective {
            path: vec![PathStep::Argument(0)],
            length_path: vec![PathStep::Argument(1)],
            element_type: TypeDescriptor::primitive(PrimitiveKind::I16),
            null_ok: false,
        };
        let compiled = directive.compile(&argtypes).unwrap();
        assert_eq!(compiled.argument_index, 0);
        assert_eq!(compiled.element_width, 2);
    }

    #[test]
    fn rejects_non_integer_length_path() {
        let argtypes = vec![
            TypeDescriptor::pointer(
                TypeDescriptor::primitive(PrimitiveKind::I16),
                PointerDirection::InOut,
            ),
            TypeDescriptor::primitive(PrimitiveKind::F32),
        ];
        let directive = MemSyncDirective {
            path: vec![PathStep::Argument(0)],
            length_path: vec![PathStep::Argument(1)],
            element_type: TypeDescriptor::primitive(PrimitiveKind::I16),
            null_ok: false,
        };
        assert!(matches!(
            directive.compile(&argtypes),
            Err(BridgeError::BadMemsync { .. })
        ));
    }

    #[test]
    fn rejects_zero_width_element() {
        let argtypes = vec![
            TypeDescriptor::pointer(TypeDescriptor::Opaque, PointerDirection::In),
            TypeDescriptor::primitive(PrimitiveKind::I32),
        ];
        let directive = MemSyncDirective {
            path: vec![PathStep::Argument(0)],
            length_path: vec![PathStep::Argument(1)],
            element_type: TypeDescriptor::struct_of(vec![], Packing::Natural),
            null_ok: false,
        };
        assert!(matches!(
            directive.compile(&argtypes),
            Err(BridgeError::BadMemsync { .. })
        ));
    }

    #[test]
    fn resolves_length_from_live_argument() {
        use crate::argtree::Value;
        let args = vec![Value::Pointer(Some(1)), Value::I16(5)];
        let len = resolve_length(&args, &[PathStep::Argument(1)]).unwrap();
        assert_eq!(len, 5);
    }
}
