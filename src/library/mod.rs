//! Library and symbol proxies on both sides of the boundary.
//!
//! [`proxy`] is the caller-facing half: `LibraryProxy` loads libraries and
//! hands out `SymbolProxy` handles carrying the `Unbound -> Bound -> Hot`
//! state machine. [`worker`] is the far-side half: a table of loaded
//! libraries and bound symbols dispatched against by the forward RPC
//! handlers, delegating the actual native call to a pluggable
//! [`worker::NativeLibrary`].

mod proxy;
mod worker;

pub use proxy::{Library, LibraryProxy, SymbolProxy};
pub use worker::{NativeLibrary, ReverseInvoker, StubLibrary, WorkerLibraryTable};
