//! Default locations of the daemon socket and configuration file
//!
//! Nothing here needs root:
//! - Socket: `$ASSUAN_SOCKET`, `$XDG_RUNTIME_DIR/assuand/S.assuand` or `/tmp/assuand-$USER/S.assuand`
//! - Config: `$XDG_CONFIG_HOME/assuand/config.toml` or `~/.config/assuand/config.toml`

use std::path::PathBuf;

/// Environment variable naming the socket to listen on or connect to
pub const ASSUAN_SOCKET_ENV: &str = "ASSUAN_SOCKET";

const SOCKET_FILENAME: &str = "S.assuand";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "assuand";

/// Socket path, honouring `$ASSUAN_SOCKET`.
pub fn default_socket_path() -> PathBuf {
    socket_path_from(|name| std::env::var(name).ok())
}

/// Config file path under the XDG config directory.
pub fn default_config_path() -> PathBuf {
    config_path_from(|name| std::env::var(name).ok())
}

fn socket_path_from(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = var(ASSUAN_SOCKET_ENV) {
        return PathBuf::from(path);
    }
    if let Some(runtime_dir) = var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let user = var("USER").unwrap_or_else(|| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, user)).join(SOCKET_FILENAME)
}

fn config_path_from(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(config_home) = var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }
    if let Some(home) = var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    // Last resort
    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}
