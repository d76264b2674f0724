//! Named procedures making up the forward and reverse RPC surfaces.
//!
//! These are plain string constants plus small serializable parameter/
//! result types — the [`crate::transport::RpcClient`]/[`crate::transport::RpcServer`]
//! pair is generic over procedure name and a `serde_json::Value` payload,
//! so this module is where the two sides agree on shapes.

use crate::argtree::{ArgumentTree, CallFrame, CallResponse, MemoryList};
use serde::{Deserialize, Serialize};

/// Procedures the caller invokes on the far side.
pub mod forward {
    pub const LOAD_LIBRARY: &str = "load_library";
    pub const BIND_SYMBOL: &str = "bind_symbol";
    pub const CALL_SYMBOL: &str = "call_symbol";
    pub const SET_PARAMETER: &str = "set_parameter";
    pub const PATH_HOST_TO_FAR: &str = "path_host_to_far";
    pub const PATH_FAR_TO_HOST: &str = "path_far_to_host";
    pub const GET_LAST_ERROR: &str = "get_last_error";
    pub const SET_LAST_ERROR: &str = "set_last_error";
    pub const FORMAT_ERROR: &str = "format_error";
    pub const WIN_ERROR: &str = "win_error";
    pub const FIND_LIBRARY: &str = "find_library";
    pub const FIND_C_RUNTIME: &str = "find_c_runtime";
    pub const TERMINATE: &str = "terminate";
}

/// Procedures the far side invokes on the caller.
pub mod reverse {
    pub const SET_SERVER_STATUS: &str = "set_server_status";
    pub const INVOKE_CALLBACK: &str = "invoke_callback";
    pub const LOG_EMIT: &str = "log_emit";
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoadLibraryParams {
    pub name: String,
    pub hash_id: String,
    pub convention: String,
    pub mode: i32,
    pub use_errno: bool,
    pub use_last_error: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BindSymbolParams {
    pub hash_id: String,
    pub symbol: String,
    pub argtypes: Vec<crate::types::TypeDescriptor>,
    pub restype: crate::types::TypeDescriptor,
    pub memsync: Vec<crate::memsync::MemSyncDirective>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallSymbolParams {
    pub hash_id: String,
    pub symbol: String,
    pub frame: CallFrame,
}

pub type CallSymbolResult = CallResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct SetParameterParams {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeCallbackParams {
    pub handle_id: u64,
    pub argument_tree: Vec<ArgumentTree>,
    pub memory_list: MemoryList,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeCallbackResult {
    pub success: bool,
    pub return_value: Option<ArgumentTree>,
    pub memory_list: MemoryList,
    pub exception: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogEmitParams {
    pub severity: u8,
    pub line: String,
}
