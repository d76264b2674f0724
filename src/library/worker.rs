//! The far side's library table: tracks loaded libraries and bound symbols,
//! and dispatches the forward RPC procedures that drive them.
//!
//! This crate never attempts to execute Windows code natively — resolving
//! and calling a real export is behind the [`NativeLibrary`] trait so a real
//! deployment can plug in a `libloading`/Wine-backed implementation without
//! touching the table or the RPC glue below it.

use crate::argtree::{CallResponse, MemoryList, Value};
use crate::error::{BridgeError, Result};
use crate::marshaller::{decode_value, encode_value, pack_return, unpack_arguments};
use crate::memsync::{CompiledMemSync, MemSyncDirective};
use crate::rpc::{self, BindSymbolParams, CallSymbolParams, InvokeCallbackParams, InvokeCallbackResult, LoadLibraryParams};
use crate::transport::RpcClient;
use crate::types::{Convention, TypeDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The far side's handle on the reverse transport: lets native code (or the
/// stub standing in for it) turn a `Value::Callback(Some(handle_id))`
/// argument into an actual round-trip back into the caller process.
pub struct ReverseInvoker {
    reverse: Arc<RpcClient>,
}

impl ReverseInvoker {
    pub fn new(reverse: Arc<RpcClient>) -> Self {
        Self { reverse }
    }

    /// Invokes the caller function registered under `handle_id`: encodes
    /// `args` against `argtypes` (the callback's own declared signature,
    /// taken from its `Funcptr` descriptor, not the enclosing call's),
    /// issues `invoke_callback` over the reverse transport, and decodes the
    /// reply against `restype`.
    pub fn invoke(
        &self,
        handle_id: u64,
        argtypes: &[TypeDescriptor],
        restype: &TypeDescriptor,
        args: &[Value],
    ) -> Result<Value> {
        let argument_tree = args
            .iter()
            .zip(argtypes)
            .map(|(v, t)| encode_value(v, t))
            .collect::<Result<Vec<_>>>()?;

        let params = InvokeCallbackParams {
            handle_id,
            argument_tree,
            memory_list: MemoryList::new(),
        };
        let raw = self.reverse.call(rpc::reverse::INVOKE_CALLBACK, serde_json::to_value(params)?)?;
        let result: InvokeCallbackResult = serde_json::from_value(raw)?;

        if !result.success {
            return Err(BridgeError::CallbackRaised {
                handle_id,
                message: result.exception.unwrap_or_else(|| "callback raised".into()),
            });
        }
        let return_value = result.return_value.ok_or_else(|| BridgeError::Wire {
            source: serde_json::Error::io(std::io::Error::other(
                "invoke_callback reported success with no return value",
            )),
        })?;
        decode_value(&return_value, restype)
    }
}

/// What the far side needs in order to actually invoke a resolved export:
/// given a symbol name and packed arguments, produce a return value and the
/// buffers any `InOut`/`Out` pointer arguments ended up holding.
///
/// A real implementation resolves `library` (by the hash id it was loaded
/// under) via `libloading`, builds a libffi-style call matching
/// `argtypes`/`convention`, invokes it, and honors `use_errno`/
/// `use_last_error` by reading the relevant thread-local after the call. If
/// the native code calls back through a `Value::Callback` argument, it does
/// so through `reverse`.
pub trait NativeLibrary: Send + Sync {
    fn load(&self, name: &str, convention: Convention, mode: i32) -> Result<()>;

    fn call(
        &self,
        library: &str,
        symbol: &str,
        argtypes: &[TypeDescriptor],
        restype: &TypeDescriptor,
        args: &[Value],
        buffers: &mut HashMap<crate::argtree::PointerId, Vec<u8>>,
        reverse: &ReverseInvoker,
    ) -> Result<Value>;
}

type StubHandler = dyn Fn(
        &[Value],
        &[TypeDescriptor],
        &mut HashMap<crate::argtree::PointerId, Vec<u8>>,
        &ReverseInvoker,
    ) -> Result<Value>
    + Send
    + Sync;

/// A `NativeLibrary` that never touches real code: every call is answered
/// by a user-registered closure keyed by symbol name, matching the "this
/// crate does not attempt to execute Windows code natively" non-goal while
/// still letting integration tests exercise the full marshalling path,
/// including pointer-reached buffer mutation and reverse callback
/// invocation.
#[derive(Clone, Default)]
pub struct StubLibrary {
    handlers: Arc<Mutex<HashMap<String, Arc<StubHandler>>>>,
}

impl StubLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_symbol<F>(&self, symbol: &str, handler: F)
    where
        F: Fn(
                &[Value],
                &[TypeDescriptor],
                &mut HashMap<crate::argtree::PointerId, Vec<u8>>,
                &ReverseInvoker,
            ) -> Result<Value>
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(symbol.to_string(), Arc::new(handler));
    }
}

impl NativeLibrary for StubLibrary {
    fn load(&self, _name: &str, _convention: Convention, _mode: i32) -> Result<()> {
        Ok(())
    }

    fn call(
        &self,
        _library: &str,
        symbol: &str,
        argtypes: &[TypeDescriptor],
        _restype: &TypeDescriptor,
        args: &[Value],
        buffers: &mut HashMap<crate::argtree::PointerId, Vec<u8>>,
        reverse: &ReverseInvoker,
    ) -> Result<Value> {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| BridgeError::LoadFailed {
                name: symbol.to_string(),
                reason: "no stub handler registered for this symbol".into(),
            })?;
        handler(args, argtypes, buffers, reverse)
    }
}

struct SymbolEntry {
    argtypes: Vec<TypeDescriptor>,
    restype: TypeDescriptor,
    memsync: Vec<CompiledMemSync>,
}

struct LibraryEntry {
    name: String,
    symbols: HashMap<String, SymbolEntry>,
}

/// The far side's table of loaded libraries and their bound symbols, keyed
/// by the hash id the caller assigned at `load_library` time.
pub struct WorkerLibraryTable<L: NativeLibrary> {
    native: L,
    reverse: Arc<RpcClient>,
    libraries: Mutex<HashMap<String, LibraryEntry>>,
    parameters: Mutex<serde_json::Map<String, serde_json::Value>>,
}

impl<L: NativeLibrary> WorkerLibraryTable<L> {
    /// `reverse` is the far side's own connection back into the caller
    /// process; it's handed to every native call as a [`ReverseInvoker`] so
    /// a `Value::Callback` argument can actually drive a reverse RPC.
    pub fn new(native: L, reverse: Arc<RpcClient>) -> Self {
        Self {
            native,
            reverse,
            libraries: Mutex::new(HashMap::new()),
            parameters: Mutex::new(serde_json::Map::new()),
        }
    }

    /// Applies the far side's half of a `set_parameter` broadcast — the
    /// caller updates its own `Config` the same way, independently.
    pub fn handle_set_parameter(&self, params: crate::rpc::SetParameterParams) -> Result<()> {
        self.parameters.lock().unwrap().insert(params.key, params.value);
        Ok(())
    }

    pub fn parameter(&self, key: &str) -> Option<serde_json::Value> {
        self.parameters.lock().unwrap().get(key).cloned()
    }

    pub fn handle_load_library(&self, params: LoadLibraryParams) -> Result<()> {
        let convention = Convention::parse(&params.convention).ok_or_else(|| {
            BridgeError::UnknownConvention {
                convention: params.convention.clone(),
            }
        })?;
        self.native.load(&params.name, convention, params.mode)?;
        self.libraries.lock().unwrap().insert(
            params.hash_id,
            LibraryEntry {
                name: params.name,
                symbols: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Declares (or redeclares) a symbol's argtypes/restype/memsync, lazily
    /// compiling its memory-sync directives against the fresh argtypes.
    pub fn handle_bind_symbol(&self, params: BindSymbolParams) -> Result<()> {
        let compiled = params
            .memsync
            .iter()
            .map(|d: &MemSyncDirective| d.compile(&params.argtypes))
            .collect::<Result<Vec<_>>>()?;

        let mut libraries = self.libraries.lock().unwrap();
        let library = libraries
            .get_mut(&params.hash_id)
            .ok_or_else(|| BridgeError::LoadFailed {
                name: params.hash_id.clone(),
                reason: "library not loaded on this side".into(),
            })?;
        library.symbols.insert(
            params.symbol,
            SymbolEntry {
                argtypes: params.argtypes,
                restype: params.restype,
                memsync: compiled,
            },
        );
        Ok(())
    }

    /// Forward-unpacks the call frame, invokes the native library (or
    /// stub), and return-packs the response. Marshalling failures and
    /// native-call failures both surface as `CallResponse.error` rather
    /// than as a transport-level failure, so the caller can distinguish
    /// "the call went through and the callee raised" from "the transport
    /// broke".
    pub fn handle_call_symbol(&self, params: CallSymbolParams) -> Result<CallResponse> {
        let library_name = {
            let libraries = self.libraries.lock().unwrap();
            let library = libraries
                .get(&params.hash_id)
                .ok_or_else(|| BridgeError::LoadFailed {
                    name: params.hash_id.clone(),
                    reason: "library not loaded on this side".into(),
                })?;
            library.name.clone()
        };

        let (argtypes, restype, memsync) = {
            let libraries = self.libraries.lock().unwrap();
            let library = libraries.get(&params.hash_id).unwrap();
            let symbol = library.symbols.get(&params.symbol).ok_or_else(|| {
                BridgeError::LoadFailed {
                    name: params.symbol.clone(),
                    reason: "symbol not bound yet".into(),
                }
            })?;
            (
                symbol.argtypes.clone(),
                symbol.restype.clone(),
                symbol.memsync.clone(),
            )
        };

        match self.try_call(&library_name, &params.symbol, &argtypes, &restype, &memsync, &params) {
            Ok(response) => Ok(response),
            Err(e) => Ok(CallResponse {
                return_value: crate::marshaller::encode_value(&Value::I32(0), &restype)
                    .unwrap_or_else(|_| crate::argtree::ArgumentTree::Pointer(crate::argtree::Sentinel::Null)),
                memory_list: crate::argtree::MemoryList::new(),
                error: Some(e.to_string()),
            }),
        }
    }

    fn try_call(
        &self,
        library_name: &str,
        symbol: &str,
        argtypes: &[TypeDescriptor],
        restype: &TypeDescriptor,
        memsync: &[CompiledMemSync],
        params: &CallSymbolParams,
    ) -> Result<CallResponse> {
        let reconstructed =
            unpack_arguments(argtypes, memsync, &params.frame.argument_tree, &params.frame.memory_list)?;

        let mut buffers = reconstructed.buffers;
        let reverse = ReverseInvoker::new(self.reverse.clone());
        let return_value = self.native.call(
            library_name,
            symbol,
            argtypes,
            restype,
            &reconstructed.values,
            &mut buffers,
            &reverse,
        )?;

        let (encoded_return, memory_list) =
            pack_return(&return_value, restype, memsync, &reconstructed.values, &buffers)?;

        Ok(CallResponse {
            return_value: encoded_return,
            memory_list,
            error: None,
        })
    }
}
