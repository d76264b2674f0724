//! The flat error taxonomy surfaced across the bridge's public API.
//!
//! Every fallible boundary in this crate returns (or wraps) a [`BridgeError`]
//! variant. The set is intentionally flat rather than nested per-component,
//! mirroring the taxonomy table in the specification this crate implements:
//! configuration, lifecycle, binding, marshalling and callback errors all
//! live in one enum so callers can match on them without reaching into
//! component-specific error types.

use crate::serializers::serialize_io_error;

/// Top-level error type for every fallible operation in this crate.
#[derive(Debug, thiserror::Error, serde::Serialize)]
pub enum BridgeError {
    // --- configuration ---
    #[error("configuration file {path} could not be read")]
    ConfigNotReadable {
        path: String,
        #[serde(serialize_with = "serialize_io_error")]
        source: std::io::Error,
    },
    #[error("configuration file {path} is not a valid JSON object")]
    ConfigMalformed { path: String },

    // --- lifecycle ---
    #[error("far-side worker did not signal startup within {waited_secs:.2}s (limit {limit_secs})")]
    StartupTimeout { waited_secs: f64, limit_secs: u64 },
    #[error("far-side worker did not signal shutdown within {waited_secs:.2}s (limit {limit_secs})")]
    ShutdownTimeout { waited_secs: f64, limit_secs: u64 },
    #[error("transport closed while a call to {symbol:?} was in flight")]
    TransportClosed { symbol: Option<String> },

    // --- binding ---
    #[error("bad type descriptor: {reason}")]
    BadType { reason: String },
    #[error("bad memory sync directive: {reason}")]
    BadMemsync { reason: String },
    #[error("symbol {library}!{symbol} has no argtypes/restype bound yet")]
    TypesNotSet { library: String, symbol: String },
    #[error("unknown calling convention {convention:?}")]
    UnknownConvention { convention: String },
    #[error("failed to load library {name}: {reason}")]
    LoadFailed { name: String, reason: String },

    // --- marshalling ---
    #[error("memory region {pointer_id} is {actual} bytes, needed {needed}")]
    ShortMemory {
        pointer_id: u64,
        actual: usize,
        needed: usize,
    },
    #[error("pointer at {path} was null but the directive does not permit that")]
    NullViolation { path: String },
    #[error("argument tree node at {path} does not match the declared type {expected}")]
    TypeMismatch { path: String, expected: String },
    #[error("callback handle {handle_id} is not registered on this side")]
    UnknownHandle { handle_id: u64 },
    #[error("memory sync of {bytes} bytes exceeds the per-call cap of {cap} bytes")]
    MemoryCapExceeded { bytes: usize, cap: usize },

    // --- callback ---
    /// The user-supplied callback raised/returned an error. This never
    /// propagates synchronously to the forward call that induced it (see
    /// the propagation policy in the error handling design); it is logged
    /// and attached to the originating call frame's trace, and the
    /// far-side trampoline reports a falsy/zero result to native code.
    #[error("callback {handle_id} raised: {message}")]
    CallbackRaised { handle_id: u64, message: String },

    /// Wraps a transport-layer I/O failure that doesn't fit one of the
    /// named lifecycle/marshalling kinds above (e.g. a socket `write`
    /// failing mid-message).
    #[error("transport I/O error")]
    Io {
        #[serde(serialize_with = "serialize_io_error")]
        #[source]
        source: std::io::Error,
    },

    /// Wraps a wire-format (de)serialization failure.
    #[error("wire format error")]
    Wire {
        #[serde(serialize_with = "crate::serializers::serialize_json_error")]
        #[source]
        source: serde_json::Error,
    },
}

impl From<std::io::Error> for BridgeError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(source: serde_json::Error) -> Self {
        Self::Wire { source }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
