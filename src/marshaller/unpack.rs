//! Forward unpack (far side) and return unpack (caller side).

use super::codec::decode_value;
use crate::argtree::{ArgumentTree, MemoryList, PointerId, Sentinel, Value};
use crate::error::{BridgeError, Result};
use crate::memsync::CompiledMemSync;
use crate::types::TypeDescriptor;
use std::collections::HashMap;

/// The far side's reconstruction of one call's arguments: the decoded
/// values, plus the native buffers each pointer argument's `PointerId`
/// resolves to (freshly allocated, pre-filled with the transported bytes).
pub struct ReconstructedArgs {
    pub values: Vec<Value>,
    pub buffers: HashMap<PointerId, Vec<u8>>,
}

/// Forward-unpacks an `ArgumentTree` against the declared argument types:
/// allocates native buffers for every pointer-reached region named by a
/// compiled memsync directive, pre-filled with the transported bytes, then
/// decodes the tree itself.
pub fn unpack_arguments(
    argtypes: &[TypeDescriptor],
    memsync: &[CompiledMemSync],
    tree: &[ArgumentTree],
    memory: &MemoryList,
) -> Result<ReconstructedArgs> {
    if tree.len() != argtypes.len() {
        return Err(BridgeError::TypeMismatch {
            path: "<arguments>".into(),
            expected: format!("{} arguments", argtypes.len()),
        });
    }

    let mut buffers = HashMap::new();
    for directive in memsync {
        let ArgumentTree::Pointer(sentinel) = &tree[directive.argument_index] else {
            return Err(BridgeError::TypeMismatch {
                path: format!("argument {}", directive.argument_index),
                expected: "pointer".into(),
            });
        };
        let id = match sentinel {
            Sentinel::Null => {
                if directive.null_ok {
                    continue;
                }
                return Err(BridgeError::NullViolation {
                    path: format!("argument {}", directive.argument_index),
                });
            }
            Sentinel::NonNull(id) => *id,
        };

        let entry = memory.last_matching(id).ok_or(BridgeError::ShortMemory {
            pointer_id: id,
            actual: 0,
            needed: directive.element_width,
        })?;
        let needed = directive.element_width * entry.element_count;
        if entry.raw_bytes.as_slice().len() < needed {
            return Err(BridgeError::ShortMemory {
                pointer_id: id,
                actual: entry.raw_bytes.as_slice().len(),
                needed,
            });
        }
        buffers.insert(id, entry.raw_bytes.as_slice()[..needed].to_vec());
    }

    let values = tree
        .iter()
        .zip(argtypes)
        .map(|(node, ty)| decode_value(node, ty))
        .collect::<Result<Vec<_>>>()?;

    Ok(ReconstructedArgs { values, buffers })
}

/// Return-unpacks the far side's response on the caller side: copies each
/// returned memory region back into the caller's real buffer, preserving
/// observable mutation without preserving pointer identity.
pub fn scatter_response(
    memory_list: &MemoryList,
    pointer_roots: &HashMap<PointerId, (*mut u8, usize)>,
) -> Result<()> {
    for entry in memory_list.iter() {
        let Some(&(ptr, capacity)) = pointer_roots.get(&entry.id) else {
            // The far side may ship regions for ids the caller never
            // registered (e.g. memory reached only by a callback during
            // this call); nothing to scatter into on this side.
            continue;
        };
        let bytes = entry.raw_bytes.as_slice();
        let to_copy = bytes.len().min(capacity);
        // Safety: `ptr` was supplied by the caller as reaching at least
        // `capacity` bytes when the call was made, and the call blocks the
        // caller's thread until the response is fully decoded.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, to_copy);
        }
    }
    Ok(())
}
