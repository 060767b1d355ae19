//! Validated daemon settings

use crate::schema::{RawConfig, RawDaemonConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Validated configuration ready for use by the daemon
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub info: BTreeMap<String, String>,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            info: raw.info,
        }
    }

    pub fn info(&self, key: &str) -> Option<&str> {
        self.info.get(key).map(String::as_str)
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// `None` keeps the server's default permissions.
    pub socket_mode: Option<u32>,
    /// `None` keeps the profile's greeting.
    pub greeting: Option<String>,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(assuan_util::default_socket_path),
            socket_mode: raw.socket_mode,
            greeting: raw.greeting,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_raw(RawDaemonConfig::default())
    }
}
