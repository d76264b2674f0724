//! Session configuration: schema, file-based defaults, and the merge order
//! used to arrive at one effective [`Config`].
//!
//! Grounded on `examples/original_source/.../core/config.py`: a prioritized
//! list of JSON files is merged in order (later files override earlier
//! ones), then constructor overrides win over all of them. Unknown keys in
//! a config file are ignored rather than rejected.

use crate::error::{BridgeError, Result};
use crate::types::Convention;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The emulator's target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Win32,
    Win64,
}

impl Default for Arch {
    fn default() -> Self {
        Self::Win32
    }
}

/// The session configuration schema. All fields have defaults; a raw JSON
/// object with only some keys present still produces a complete `Config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub id: String,
    pub stdout: bool,
    pub stderr: bool,
    pub log_write: bool,
    pub log_level: u8,
    pub arch: Arch,
    pub pythonversion: String,
    pub dir: PathBuf,
    pub timeout_start: u64,
    pub timeout_stop: u64,
    pub winedebug: String,
    pub port_socket_unix: u16,
    pub port_socket_wine: u16,
}

/// Environment variable naming a directory to search for an override
/// config file, checked between the user's home directory and the current
/// working directory (the original source used `$ZUGBRUECKE` for the same
/// purpose).
pub const CONFIG_DIR_ENV_VAR: &str = "WINBRIDGE_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "winbridge.json";

impl Default for Config {
    fn default() -> Self {
        Self {
            id: format!("winbridge-{}", uuid::Uuid::new_v4()),
            stdout: true,
            stderr: true,
            log_write: false,
            log_level: 0,
            arch: Arch::Win32,
            pythonversion: "3.11".into(),
            dir: default_config_directory(),
            timeout_start: 30,
            timeout_stop: 30,
            winedebug: "-all".into(),
            port_socket_unix: 0,
            port_socket_wine: 0,
        }
    }
}

fn default_config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".winbridge")
}

impl Config {
    /// Loads configuration the way a session brings itself up: merge every
    /// config file found on the priority list (lowest priority first), then
    /// apply `overrides` (parsed as a partial JSON object) on top.
    pub fn load(overrides: Option<&serde_json::Value>) -> Result<Self> {
        let mut value = serde_json::to_value(Config::default())?;

        for path in config_file_candidates() {
            if let Some(file_value) = load_config_file(&path)? {
                merge_json(&mut value, &file_value);
            }
        }

        if let Some(overrides) = overrides {
            merge_json(&mut value, overrides);
        }

        Ok(serde_json::from_value(value)?)
    }

    pub fn wineprefix(&self) -> PathBuf {
        let arch = match self.arch {
            Arch::Win32 => "win32",
            Arch::Win64 => "win64",
        };
        self.dir.join(format!("{arch}-wine"))
    }
}

/// Returns the config file search path in priority order, lowest first —
/// matching `/etc/<name>`, user home, an env-var-named override directory,
/// then the current working directory.
fn config_file_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("/etc").join(CONFIG_FILE_NAME)];

    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".winbridge").join(CONFIG_FILE_NAME));
    }

    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV_VAR) {
        candidates.push(PathBuf::from(dir).join(CONFIG_FILE_NAME));
    }

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(CONFIG_FILE_NAME));
    }

    candidates
}

fn load_config_file(path: &Path) -> Result<Option<serde_json::Value>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|source| BridgeError::ConfigNotReadable {
        path: path.display().to_string(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|_| BridgeError::ConfigMalformed {
            path: path.display().to_string(),
        })?;
    if !value.is_object() {
        return Err(BridgeError::ConfigMalformed {
            path: path.display().to_string(),
        });
    }
    Ok(Some(value))
}

/// Shallow merge: every key present in `overlay` replaces the key in
/// `base`. Unknown keys in `overlay` are carried through and simply ignored
/// later by `serde_json::from_value`'s `#[serde(default)]` field handling.
fn merge_json(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    let (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) =
        (base, overlay)
    else {
        return;
    };
    for (key, value) in overlay_map {
        base_map.insert(key.clone(), value.clone());
    }
}

/// Parses a calling-convention string from a config-adjacent context (not
/// part of the schema itself, but shared validation logic symbols bind
/// against — see [`crate::library::proxy`]).
pub fn parse_convention(name: &str) -> Result<Convention> {
    Convention::parse(name).ok_or_else(|| BridgeError::UnknownConvention {
        convention: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_schema() {
        let cfg = Config::default();
        assert_eq!(cfg.timeout_start, 30);
        assert_eq!(cfg.timeout_stop, 30);
        assert_eq!(cfg.winedebug, "-all");
        assert!(cfg.stdout);
    }

    #[test]
    fn overrides_win_over_files() {
        let overrides = serde_json::json!({ "timeout_start": 5 });
        let cfg = Config::load(Some(&overrides)).unwrap();
        assert_eq!(cfg.timeout_start, 5);
    }

    #[test]
    fn merge_only_touches_overlapping_keys() {
        let mut base = serde_json::json!({ "a": 1, "b": 2 });
        let overlay = serde_json::json!({ "b": 3, "c": 4 });
        merge_json(&mut base, &overlay);
        assert_eq!(base, serde_json::json!({ "a": 1, "b": 3, "c": 4 }));
    }
}
