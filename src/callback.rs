//! Assigns stable identifiers to caller-supplied functions, and dispatches
//! reverse invocations (native code on the far side calling back into the
//! caller process) against them.

use crate::argtree::{ArgumentTree, MemoryList, Value};
use crate::error::{BridgeError, Result};
use crate::marshaller::{decode_value, encode_value};
use crate::memsync::CompiledMemSync;
use crate::types::TypeDescriptor;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A user-supplied callback, boxed behind the signature every registered
/// function shares once its arguments have been decoded into [`Value`]s.
pub type UserFunction = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// A stable identifier for a caller-supplied function pointer, handed out
/// by [`CallbackRegistry::register`]. Cheap to clone; lives for the session
/// or until explicitly removed with [`CallbackRegistry::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    id: u64,
}

impl CallbackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct CallbackEntry {
    user_function: Arc<UserFunction>,
    argtypes: Vec<TypeDescriptor>,
    restype: TypeDescriptor,
    memsync: Vec<CompiledMemSync>,
}

/// Maintains the `handle_id -> {user_function, argtypes, restype, memsync}`
/// table and dispatches reverse RPC invocations against it.
///
/// A single handle may be invoked concurrently by different native
/// threads on the far side; lookups proceed under a short-lived lock and
/// the user function itself runs without holding the table lock, so the
/// registry makes no assumption of thread affinity — the user function is
/// responsible for its own locking.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    next_id: Arc<AtomicU64>,
    table: Arc<Mutex<HashMap<u64, CallbackEntry>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a caller-supplied function and returns a stable handle for
    /// it. Each call allocates a fresh id: the registry does not
    /// deduplicate identical closures, matching the "assign a fresh
    /// handle_id" wording used for forward-call pointer ids (the original
    /// source caches callback wrappers per Python callable, but identity
    /// caching is an optimization, not a correctness requirement).
    pub fn register(
        &self,
        user_function: Arc<UserFunction>,
        argtypes: Vec<TypeDescriptor>,
        restype: TypeDescriptor,
        memsync: Vec<CompiledMemSync>,
    ) -> CallbackHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.table.lock().unwrap().insert(
            id,
            CallbackEntry {
                user_function,
                argtypes,
                restype,
                memsync,
            },
        );
        CallbackHandle { id }
    }

    pub fn unregister(&self, handle_id: u64) {
        self.table.lock().unwrap().remove(&handle_id);
    }

    /// Handles one reverse RPC invocation: unpacks arguments and pointer
    /// memory in the marshaller's server orientation, invokes the user
    /// function, and packs the mutated memory plus return value for the
    /// reply.
    ///
    /// A raised/returned error from the user function does **not**
    /// propagate as an `Err` here in the sense of aborting the reverse
    /// call — it is turned into a `CallbackRaised` error that the caller
    /// (the far-side trampoline, via RPC) is expected to log and report as
    /// a falsy/zero result to the native code that invoked the callback.
    pub fn dispatch(
        &self,
        handle_id: u64,
        args_tree: &[ArgumentTree],
        memory: &MemoryList,
    ) -> Result<(ArgumentTree, MemoryList)> {
        let (user_function, argtypes, restype, memsync) = {
            let table = self.table.lock().unwrap();
            let entry = table
                .get(&handle_id)
                .ok_or(BridgeError::UnknownHandle { handle_id })?;
            (
                entry.user_function.clone(),
                entry.argtypes.clone(),
                entry.restype.clone(),
                entry.memsync.clone(),
            )
        };

        let reconstructed =
            crate::marshaller::unpack_arguments(&argtypes, &memsync, args_tree, memory)?;

        let result = user_function(&reconstructed.values).map_err(|e| BridgeError::CallbackRaised {
            handle_id,
            message: e.to_string(),
        })?;

        let (encoded_return, out_memory) = crate::marshaller::pack_return(
            &result,
            &restype,
            &memsync,
            &reconstructed.values,
            &reconstructed.buffers,
        )?;

        Ok((encoded_return, out_memory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveKind;

    #[test]
    fn dispatch_invokes_user_function_and_doubles() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            Arc::new(|args: &[Value]| {
                let Value::I16(x) = args[0] else { panic!() };
                Ok(Value::I16(x * x))
            }),
            vec![TypeDescriptor::primitive(PrimitiveKind::I16)],
            TypeDescriptor::primitive(PrimitiveKind::I16),
            vec![],
        );

        let tree = vec![encode_value(&Value::I16(3), &TypeDescriptor::primitive(PrimitiveKind::I16)).unwrap()];
        let (ret, _) = registry.dispatch(handle.id(), &tree, &MemoryList::new()).unwrap();
        let decoded = decode_value(&ret, &TypeDescriptor::primitive(PrimitiveKind::I16)).unwrap();
        assert!(matches!(decoded, Value::I16(9)));
    }

    #[test]
    fn unknown_handle_is_reported() {
        let registry = CallbackRegistry::new();
        let err = registry.dispatch(42, &[], &MemoryList::new()).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownHandle { handle_id: 42 }));
    }

    #[test]
    fn raised_error_is_reported_not_propagated_as_transport_failure() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            Arc::new(|_: &[Value]| {
                Err(BridgeError::BadType {
                    reason: "boom".into(),
                })
            }),
            vec![],
            TypeDescriptor::primitive(PrimitiveKind::I16),
            vec![],
        );
        let err = registry.dispatch(handle.id(), &[], &MemoryList::new()).unwrap_err();
        assert!(matches!(err, BridgeError::CallbackRaised { .. }));
    }
}
