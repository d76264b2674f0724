//! Caller-side library and symbol proxies.

use crate::argtree::{CallFrame, Value};
use crate::callback::{CallbackHandle, CallbackRegistry, UserFunction};
use crate::error::{BridgeError, Result};
use crate::marshaller::{decode_value, pack_arguments, scatter_response, CallArgument};
use crate::memsync::{CompiledMemSync, MemSyncDirective};
use crate::rpc::{self, BindSymbolParams, CallSymbolParams, LoadLibraryParams};
use crate::transport::RpcClient;
use crate::types::{Convention, TypeDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn hash_of(name: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// The caller side's table of loaded libraries, keyed by name so
/// `load_library` is idempotent.
#[derive(Clone)]
pub struct LibraryProxy {
    forward: Arc<RpcClient>,
    callbacks: CallbackRegistry,
    libraries: Arc<Mutex<HashMap<String, Library>>>,
}

impl LibraryProxy {
    pub fn new(forward: Arc<RpcClient>, callbacks: CallbackRegistry) -> Self {
        Self {
            forward,
            callbacks,
            libraries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Loads `name` with the given calling convention, idempotent per
    /// name. Fails with `LoadFailed` if the far side can't resolve it.
    pub fn load_library(
        &self,
        name: &str,
        convention: Convention,
        mode: i32,
        use_errno: bool,
        use_last_error: bool,
    ) -> Result<Library> {
        if let Some(existing) = self.libraries.lock().unwrap().get(name) {
            return Ok(existing.clone());
        }

        let hash_id = hash_of(name);
        let params = LoadLibraryParams {
            name: name.to_string(),
            hash_id: hash_id.clone(),
            convention: convention.as_str().to_string(),
            mode,
            use_errno,
            use_last_error,
        };
        self.forward
            .call(rpc::forward::LOAD_LIBRARY, serde_json::to_value(params)?)
            .map_err(|_| BridgeError::LoadFailed {
                name: name.to_string(),
                reason: "far side could not resolve the library".into(),
            })?;

        let library = Library {
            name: name.to_string(),
            hash_id,
            convention,
            forward: self.forward.clone(),
            callbacks: self.callbacks.clone(),
            symbols: Arc::new(Mutex::new(HashMap::new())),
        };
        self.libraries
            .lock()
            .unwrap()
            .insert(name.to_string(), library.clone());
        Ok(library)
    }
}

/// A loaded library on the caller side: a name, the far side's resolved
/// handle's hash id, the calling convention it was loaded with, and a
/// cache of resolved symbol proxies.
#[derive(Clone)]
pub struct Library {
    name: String,
    hash_id: String,
    convention: Convention,
    forward: Arc<RpcClient>,
    callbacks: CallbackRegistry,
    symbols: Arc<Mutex<HashMap<String, SymbolProxy>>>,
}

impl Library {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Yields a symbol proxy onto which `argtypes`/`restype`/`memsync` may
    /// be attached. Resolving the same name twice returns the same proxy.
    pub fn resolve(&self, symbol_name: &str) -> SymbolProxy {
        let mut symbols = self.symbols.lock().unwrap();
        symbols
            .entry(symbol_name.to_string())
            .or_insert_with(|| {
                SymbolProxy::new(
                    self.hash_id.clone(),
                    symbol_name.to_string(),
                    self.convention,
                    self.forward.clone(),
                    self.callbacks.clone(),
                )
            })
            .clone()
    }
}

/// The `Unbound -> Bound -> Hot` state of one symbol proxy.
#[derive(Debug, Clone, PartialEq)]
enum SymbolState {
    Unbound,
    Bound,
    Hot,
}

struct SymbolInner {
    hash_id: String,
    symbol_name: String,
    convention: Convention,
    forward: Arc<RpcClient>,
    callbacks: CallbackRegistry,
    state: Mutex<SymbolState>,
    argtypes: Mutex<Vec<TypeDescriptor>>,
    restype: Mutex<TypeDescriptor>,
    memsync_raw: Mutex<Vec<MemSyncDirective>>,
    memsync_compiled: Mutex<Vec<CompiledMemSync>>,
    errcheck: Mutex<Option<Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>>>,
    bound_remote: Mutex<bool>,
}

/// A caller-side proxy onto one resolved symbol. Types, an error checker,
/// and memory-sync directives may be attached before the first call; these
/// mutations are shadowed locally and lazily propagated to the far side on
/// first call.
#[derive(Clone)]
pub struct SymbolProxy(Arc<SymbolInner>);

impl SymbolProxy {
    fn new(
        hash_id: String,
        symbol_name: String,
        convention: Convention,
        forward: Arc<RpcClient>,
        callbacks: CallbackRegistry,
    ) -> Self {
        Self(Arc::new(SymbolInner {
            hash_id,
            symbol_name,
            convention,
            forward,
            callbacks,
            state: Mutex::new(SymbolState::Unbound),
            argtypes: Mutex::new(Vec::new()),
            restype: Mutex::new(TypeDescriptor::Primitive(crate::types::PrimitiveKind::I32)),
            memsync_raw: Mutex::new(Vec::new()),
            memsync_compiled: Mutex::new(Vec::new()),
            errcheck: Mutex::new(None),
            bound_remote: Mutex::new(false),
        }))
    }

    /// Declares the argument types and return type for this symbol,
    /// advancing `Unbound -> Bound`. Memory-sync directives, if any, must
    /// be set after this (they're validated against these argtypes).
    pub fn set_types(&self, argtypes: Vec<TypeDescriptor>, restype: TypeDescriptor) -> Result<()> {
        for a in &argtypes {
            a.validate()?;
        }
        restype.validate()?;
        *self.0.argtypes.lock().unwrap() = argtypes;
        *self.0.restype.lock().unwrap() = restype;
        *self.0.state.lock().unwrap() = SymbolState::Bound;
        Ok(())
    }

    /// Attaches memory-sync directives, compiling and validating them
    /// against the argtypes set via [`Self::set_types`]. Advances
    /// `Bound -> Hot`.
    pub fn set_memsync(&self, directives: Vec<MemSyncDirective>) -> Result<()> {
        let argtypes = self.0.argtypes.lock().unwrap().clone();
        if argtypes.is_empty() && !directives.is_empty() {
            return Err(BridgeError::TypesNotSet {
                library: self.0.hash_id.clone(),
                symbol: self.0.symbol_name.clone(),
            });
        }
        let compiled = directives
            .iter()
            .map(|d| d.compile(&argtypes))
            .collect::<Result<Vec<_>>>()?;
        *self.0.memsync_raw.lock().unwrap() = directives;
        *self.0.memsync_compiled.lock().unwrap() = compiled;
        *self.0.state.lock().unwrap() = SymbolState::Hot;
        Ok(())
    }

    /// Attaches an error-checking/transforming function applied to the
    /// decoded return value of every call, analogous to ctypes'
    /// `errcheck`.
    pub fn set_errcheck<F>(&self, f: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        *self.0.errcheck.lock().unwrap() = Some(Arc::new(f));
    }

    /// Registers a caller-supplied function to be used as one of this
    /// symbol's function-pointer arguments, returning a handle to pass as
    /// a [`CallArgument::Callback`].
    pub fn register_callback(
        &self,
        user_function: Arc<UserFunction>,
        argtypes: Vec<TypeDescriptor>,
        restype: TypeDescriptor,
    ) -> CallbackHandle {
        self.0
            .callbacks
            .register(user_function, argtypes, restype, Vec::new())
    }

    /// Builds a `CallFrame`, invokes the far side, and returns the decoded
    /// value. Rejected with `TypesNotSet` while the proxy is still
    /// `Unbound`.
    pub fn call(&self, args: Vec<CallArgument>) -> Result<Value> {
        let state = self.0.state.lock().unwrap().clone();
        if state == SymbolState::Unbound {
            return Err(BridgeError::TypesNotSet {
                library: self.0.hash_id.clone(),
                symbol: self.0.symbol_name.clone(),
            });
        }

        let argtypes = self.0.argtypes.lock().unwrap().clone();
        let restype = self.0.restype.lock().unwrap().clone();
        let memsync_raw = self.0.memsync_raw.lock().unwrap().clone();
        let memsync_compiled = self.0.memsync_compiled.lock().unwrap().clone();

        self.bind_remote_if_needed(&argtypes, &restype, &memsync_raw)?;

        let packed = pack_arguments(&argtypes, &memsync_compiled, &args)?;
        let frame = CallFrame {
            symbol_id: self.0.symbol_name.clone(),
            argument_tree: packed.argument_tree,
            memory_list: packed.memory_list,
            return_descriptor: restype.clone(),
        };

        let params = CallSymbolParams {
            hash_id: self.0.hash_id.clone(),
            symbol: self.0.symbol_name.clone(),
            frame,
        };
        let raw = self
            .0
            .forward
            .call(rpc::forward::CALL_SYMBOL, serde_json::to_value(params)?)?;
        let response: rpc::CallSymbolResult = serde_json::from_value(raw)?;

        if let Some(message) = response.error {
            return Err(BridgeError::TypeMismatch {
                path: self.0.symbol_name.clone(),
                expected: message,
            });
        }

        scatter_response(&response.memory_list, &packed.pointer_roots)?;
        let value = decode_value(&response.return_value, &restype)?;

        match self.0.errcheck.lock().unwrap().as_ref() {
            Some(f) => f(value),
            None => Ok(value),
        }
    }

    fn bind_remote_if_needed(
        &self,
        argtypes: &[TypeDescriptor],
        restype: &TypeDescriptor,
        memsync: &[MemSyncDirective],
    ) -> Result<()> {
        let mut bound = self.0.bound_remote.lock().unwrap();
        if *bound {
            return Ok(());
        }
        let params = BindSymbolParams {
            hash_id: self.0.hash_id.clone(),
            symbol: self.0.symbol_name.clone(),
            argtypes: argtypes.to_vec(),
            restype: restype.clone(),
            memsync: memsync.to_vec(),
        };
        self.0
            .forward
            .call(rpc::forward::BIND_SYMBOL, serde_json::to_value(params)?)?;
        *bound = true;
        Ok(())
    }

    pub fn convention(&self) -> Convention {
        self.0.convention
    }
}
