//! Calling convention tags.

use serde::{Deserialize, Serialize};

/// Calling convention drawn from the closed set the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Convention {
    /// `__cdecl` / standard C calling convention.
    #[serde(rename = "standard-C")]
    StandardC,
    /// `__stdcall`, used by most of the Win32 API.
    #[serde(rename = "system-stdcall")]
    SystemStdcall,
    /// `__stdcall` variant used by OLE/COM vtables.
    #[serde(rename = "system-ole")]
    SystemOle,
}

impl Convention {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "standard-C" => Some(Self::StandardC),
            "system-stdcall" => Some(Self::SystemStdcall),
            "system-ole" => Some(Self::SystemOle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StandardC => "standard-C",
            Self::SystemStdcall => "system-stdcall",
            Self::SystemOle => "system-ole",
        }
    }
}
