//! Forward pack (caller side) and return pack (far side).

use super::codec::encode_value;
use crate::argtree::{ArgumentTree, MemoryEntry, MemoryList, PointerId, Value};
use crate::callback::CallbackHandle;
use crate::error::{BridgeError, Result};
use crate::memsync::{resolve_length, CompiledMemSync, DEFAULT_MEMORY_CAP};
use crate::types::TypeDescriptor;
use std::collections::HashMap;

/// One argument as supplied at a call site. This is the caller-facing
/// counterpart of [`Value`]: plain scalars/aggregates pack directly,
/// `Pointer` argument slots additionally carry the real address and
/// capacity of the caller-owned buffer they reach (what a memsync
/// directive, if any, will read from and scatter back into).
pub enum CallArgument {
    Scalar(Value),
    Null,
    /// A pointer-typed argument reaching `len_bytes` of caller-owned
    /// memory at `ptr`. Exactly how many of those bytes are transported is
    /// decided by the symbol's compiled [`CompiledMemSync`] directive for
    /// this slot, not by `len_bytes` — `len_bytes` is a capacity the
    /// bridge refuses to exceed.
    Pointer { ptr: *mut u8, len_bytes: usize },
    Callback(Option<CallbackHandle>),
}

// Safety: `CallArgument` is only ever read back on the same thread that
// issued the call it was built for (the RPC client call blocks the calling
// thread until the response arrives), so the raw pointer never crosses a
// thread boundary concurrently with the caller's own use of that memory.
unsafe impl Send for CallArgument {}

/// The result of packing a forward call's arguments: the wire-safe tree,
/// the out-of-band memory regions, and (caller-side only) the raw buffers
/// each `PointerId` maps back to, so the response can scatter bytes into
/// the caller's real memory once the call returns.
pub struct ForwardPack {
    pub argument_tree: Vec<ArgumentTree>,
    pub memory_list: MemoryList,
    pub pointer_roots: HashMap<PointerId, (*mut u8, usize)>,
}

unsafe impl Send for ForwardPack {}

/// Packs caller-supplied arguments into a [`ForwardPack`], implementing the
/// four forward-pack steps: build the by-value tree, assign pointer ids,
/// evaluate memsync directives in declaration order, and substitute
/// callback handle ids for function-pointer arguments.
pub fn pack_arguments(
    argtypes: &[TypeDescriptor],
    memsync: &[CompiledMemSync],
    args: &[CallArgument],
) -> Result<ForwardPack> {
    if args.len() != argtypes.len() {
        return Err(BridgeError::TypeMismatch {
            path: "<arguments>".into(),
            expected: format!("{} arguments", argtypes.len()),
        });
    }

    let mut next_id: PointerId = 1;
    let mut pointer_roots = HashMap::new();
    let mut values = Vec::with_capacity(args.len());

    for arg in args {
        let value = match arg {
            CallArgument::Scalar(v) => v.clone(),
            CallArgument::Null => Value::Pointer(None),
            CallArgument::Pointer { ptr, len_bytes } => {
                let id = next_id;
                next_id += 1;
                pointer_roots.insert(id, (*ptr, *len_bytes));
                Value::Pointer(Some(id))
            }
            CallArgument::Callback(handle) => Value::Callback(handle.as_ref().map(|h| h.id())),
        };
        values.push(value);
    }

    let mut argument_tree = Vec::with_capacity(values.len());
    for (value, ty) in values.iter().zip(argtypes) {
        argument_tree.push(encode_value(value, ty)?);
    }

    let mut memory_list = MemoryList::new();
    for directive in memsync {
        let sentinel = match &values[directive.argument_index] {
            Value::Pointer(p) => *p,
            _ => {
                return Err(BridgeError::BadMemsync {
                    reason: format!("argument {} is not a pointer", directive.argument_index),
                })
            }
        };
        let Some(id) = sentinel else {
            if directive.null_ok {
                continue;
            }
            return Err(BridgeError::NullViolation {
                path: format!("argument {}", directive.argument_index),
            });
        };

        let count = resolve_length(&values, &directive.length_path)?;
        let total = count
            .checked_mul(directive.element_width)
            .ok_or_else(|| BridgeError::MemoryCapExceeded {
                bytes: usize::MAX,
                cap: DEFAULT_MEMORY_CAP,
            })?;
        if total > DEFAULT_MEMORY_CAP {
            return Err(BridgeError::MemoryCapExceeded {
                bytes: total,
                cap: DEFAULT_MEMORY_CAP,
            });
        }

        let (ptr, capacity) = pointer_roots
            .get(&id)
            .copied()
            .ok_or_else(|| BridgeError::BadMemsync {
                reason: format!("argument {} has no caller buffer registered", directive.argument_index),
            })?;
        if total > capacity {
            return Err(BridgeError::ShortMemory {
                pointer_id: id,
                actual: capacity,
                needed: total,
            });
        }

        // Safety: `ptr` was supplied by the caller as reaching at least
        // `capacity` bytes (checked above), and this call blocks the
        // caller's thread until it returns, so nothing else mutates this
        // region concurrently from our side.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, total).to_vec() };

        memory_list.push(MemoryEntry {
            id,
            raw_bytes: bytes.into(),
            element_type: directive.element_type.clone(),
            element_count: count,
        });
    }

    Ok(ForwardPack {
        argument_tree,
        memory_list,
        pointer_roots,
    })
}

/// Packs the far side's response to a call: the return value against its
/// declared descriptor, plus a fresh `MemoryList` re-read from the
/// reconstructed buffers for *every* compiled directive — untouched
/// regions still ship, per the specification's "the caller is entitled to
/// observe overwrites" rule.
pub fn pack_return(
    return_value: &Value,
    return_descriptor: &TypeDescriptor,
    memsync: &[CompiledMemSync],
    args: &[Value],
    buffers: &HashMap<PointerId, Vec<u8>>,
) -> Result<(ArgumentTree, MemoryList)> {
    let encoded_return = encode_value(return_value, return_descriptor)?;

    let mut memory_list = MemoryList::new();
    for directive in memsync {
        let Value::Pointer(Some(id)) = args[directive.argument_index] else {
            continue;
        };
        let Some(buf) = buffers.get(&id) else {
            continue;
        };
        let count = resolve_length(args, &directive.length_path)?;
        memory_list.push(MemoryEntry {
            id,
            raw_bytes: buf.clone().into(),
            element_type: directive.element_type.clone(),
            element_count: count,
        });
    }

    Ok((encoded_return, memory_list))
}
