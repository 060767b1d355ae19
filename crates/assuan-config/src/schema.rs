//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Daemon settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Values served by `GETINFO <key>`
    #[serde(default)]
    pub info: BTreeMap<String, String>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawDaemonConfig {
    /// Socket path (default: `$ASSUAN_SOCKET` or the runtime dir)
    pub socket_path: Option<PathBuf>,

    /// Socket file permissions, e.g. `0o660`
    pub socket_mode: Option<u32>,

    /// Text sent with the first `OK`
    pub greeting: Option<String>,
}
