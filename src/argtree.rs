//! The transport-neutral data model a forward or reverse call is built from:
//! [`Value`] (concrete, typed argument content), [`ArgumentTree`] (its wire
//! form), [`MemoryEntry`]/[`MemoryList`] (out-of-band pointer-reached
//! memory) and [`CallFrame`] (everything needed to make or answer one call).

use crate::types::TypeDescriptor;
use crate::wire::ByteBlob;
use serde::{Deserialize, Serialize};

/// Identifies a pointer within the scope of a single call. Pointer *identity*
/// is never preserved across the boundary, only reachability — a fresh id is
/// assigned per call, per pointer encountered.
pub type PointerId = u64;

/// The by-value sentinel carried for a pointer-typed argument slot: either
/// null, or non-null with the id used to look its pointee memory up in the
/// call's [`MemoryList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentinel {
    Null,
    NonNull(PointerId),
}

/// A concrete argument/return value on either side of the boundary, typed
/// against a [`TypeDescriptor`]. This is what caller code and far-side
/// native-call glue actually operate on; the [marshaller](crate::marshaller)
/// converts between this and [`ArgumentTree`].
#[derive(Debug, Clone)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(u8),
    WChar(u16),
    /// A pointer value: `None` is null, `Some(id)` reaches memory kept in
    /// the call's `MemoryList` (or a nested argument tree, for pointers to
    /// other declared arguments).
    Pointer(Option<PointerId>),
    /// A function-pointer argument: `None` is null, `Some(handle_id)` names
    /// a registered [`crate::callback::CallbackHandle`].
    Callback(Option<u64>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Union { active: String, value: Box<Value> },
}

/// The wire form of one argument-tree node: raw byte content for
/// primitives, recursive children for aggregates, and a [`Sentinel`] for
/// pointers (the pointee, if any, travels out-of-band in the
/// [`MemoryList`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ArgumentTree {
    Primitive(ByteBlob),
    Pointer(Sentinel),
    /// `None` marks a null function pointer; `Some` carries the stable
    /// handle id assigned by the [`crate::callback::CallbackRegistry`].
    Callback(Option<u64>),
    Array(Vec<ArgumentTree>),
    Struct(Vec<(String, ArgumentTree)>),
    Union {
        active: String,
        value: Box<ArgumentTree>,
    },
}

/// One pointer-reached memory region, transported out-of-band from the
/// argument tree that references it by [`PointerId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: PointerId,
    pub raw_bytes: ByteBlob,
    pub element_type: TypeDescriptor,
    pub element_count: usize,
}

impl MemoryEntry {
    pub fn expected_len(&self) -> Result<usize, crate::error::BridgeError> {
        Ok(self.element_type.size_of()? * self.element_count)
    }
}

/// Out-of-band payload of every pointer-reached byte region touched by one
/// call. Regions are packed in directive-declaration order (see the
/// marshaller's ordering rules); when two directives name overlapping
/// regions the *later* entry for a given id wins on unpack, which is why
/// lookups use [`MemoryList::last_matching`] rather than the first hit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryList(pub Vec<MemoryEntry>);

impl MemoryList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MemoryEntry) {
        self.0.push(entry);
    }

    /// Per the tie-break rule: when multiple entries share an id, the one
    /// that was packed *later* is authoritative on unpack.
    pub fn last_matching(&self, id: PointerId) -> Option<&MemoryEntry> {
        self.0.iter().rev().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.0.iter()
    }
}

/// Everything needed to make (caller side) or answer (far side) one forward
/// call. Created fresh for each call and dropped once the response has been
/// decoded — there is no cross-call state here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    pub symbol_id: String,
    pub argument_tree: Vec<ArgumentTree>,
    pub memory_list: MemoryList,
    pub return_descriptor: TypeDescriptor,
}

/// The far side's answer to a [`CallFrame`]: the return value, any updated
/// memory regions (untouched regions still ship — the caller is entitled to
/// observe overwrites), and an optional error description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub return_value: ArgumentTree,
    pub memory_list: MemoryList,
    pub error: Option<String>,
}
