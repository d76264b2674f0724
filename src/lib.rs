//! A cross-process FFI bridge: call functions exported by Windows DLLs,
//! running under an emulated Windows worker process, from a Unix host
//! program.
//!
//! The crate is organized around the six components a call crosses through:
//! a [`types`] descriptor for every argument/return slot, [`memsync`]
//! directives naming the caller memory a pointer argument reaches, the
//! [`marshaller`] that packs/unpacks values and memory against those
//! descriptors, the [`callback`] registry for caller-supplied function
//! pointers, the [`library`] proxy/worker pair that binds symbols and
//! carries calls across, and the [`session`] supervisor that brings a
//! worker up and tears it down.

pub mod argtree;
pub mod callback;
pub mod config;
pub mod error;
pub mod farside;
pub mod library;
pub mod logging;
pub mod marshaller;
pub mod memsync;
pub mod rpc;
mod serializers;
pub mod session;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{BridgeError, Result};
