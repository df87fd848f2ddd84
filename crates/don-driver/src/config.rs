//! Driver configuration
//!
//! Values come from, in increasing priority: built-in defaults, the
//! environment file (`/etc/don/environment`), `DON_*` environment variables
//! and finally command-line flags applied by the binary.
//!
//! Call `load_environment()` early in main() so the file's variables are
//! visible to [`DriverConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::retry::Backoff;

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/don/environment";

/// Variable naming an alternative environment file
pub const ENV_FILE_VAR: &str = "DON_ENV_FILE";

pub const DEFAULT_DRIVER_NAME: &str = "ovs";
pub const DEFAULT_PLUGIN_DIR: &str = "/run/docker/plugins";
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Load variables from the environment file without overriding any that
/// are already set.
///
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var(ENV_FILE_VAR) {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
        warn!("{} points to {}, which could not be loaded", ENV_FILE_VAR, custom_path);
    }

    let loaded = try_load_env_file(DEFAULT_ENV_FILE);
    if loaded.is_none() {
        debug!("No environment file found, using existing environment");
    }
    loaded
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for (key, value) in content.lines().filter_map(parse_env_line) {
                if std::env::var(&key).is_err() {
                    debug!("Loaded: {}={}", key, value);
                    std::env::set_var(&key, &value);
                    loaded_count += 1;
                } else {
                    debug!("Skipped (already set): {}", key);
                    skipped_count += 1;
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`; comments and blank
/// lines yield None
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn get_config_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = get_config_opt(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}

/// Where and how to reach ovsdb-server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OvsdbConfig {
    /// `unix:<path>` or `tcp:<host>:<port>`; autodetected when unset
    pub endpoint: Option<String>,
    /// Per-RPC timeout in seconds
    pub timeout_secs: u64,
    pub connect_initial_ms: u64,
    pub connect_max_interval_ms: u64,
    pub connect_max_elapsed_secs: u64,
}

impl Default for OvsdbConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
            connect_initial_ms: 500,
            connect_max_interval_ms: 5_000,
            connect_max_elapsed_secs: 30,
        }
    }
}

impl OvsdbConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Startup connection schedule
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.connect_initial_ms),
            max_interval: Duration::from_millis(self.connect_max_interval_ms),
            max_elapsed: Duration::from_secs(self.connect_max_elapsed_secs),
            ..Backoff::default()
        }
    }
}

/// Docker Engine API client used for the registry fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub enabled: bool,
    pub socket: PathBuf,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket: PathBuf::from(DEFAULT_DOCKER_SOCKET),
        }
    }
}

/// Complete driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver name; also the socket name Docker discovers
    pub name: String,
    pub plugin_dir: PathBuf,
    /// Group owning the plugin socket
    pub socket_gid: Option<u32>,
    pub ovsdb: OvsdbConfig,
    pub docker: DockerConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DRIVER_NAME.to_string(),
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            socket_gid: None,
            ovsdb: OvsdbConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Defaults overlaid with `DON_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(name) = get_config_opt("DON_DRIVER_NAME") {
            config.name = name;
        }
        if let Some(dir) = get_config_opt("DON_PLUGIN_DIR") {
            config.plugin_dir = PathBuf::from(dir);
        }
        if let Some(gid) = get_config_parsed("DON_SOCKET_GID") {
            config.socket_gid = Some(gid);
        }

        if let Some(endpoint) = get_config_opt("DON_OVSDB_ENDPOINT") {
            config.ovsdb.endpoint = Some(endpoint);
        }
        if let Some(secs) = get_config_parsed("DON_OVSDB_TIMEOUT_SECS") {
            config.ovsdb.timeout_secs = secs;
        }
        if let Some(ms) = get_config_parsed("DON_OVSDB_CONNECT_INITIAL_MS") {
            config.ovsdb.connect_initial_ms = ms;
        }
        if let Some(ms) = get_config_parsed("DON_OVSDB_CONNECT_MAX_INTERVAL_MS") {
            config.ovsdb.connect_max_interval_ms = ms;
        }
        if let Some(secs) = get_config_parsed("DON_OVSDB_CONNECT_MAX_ELAPSED_SECS") {
            config.ovsdb.connect_max_elapsed_secs = secs;
        }

        config.docker.enabled = get_config_bool("DON_DOCKER_ENABLED", config.docker.enabled);
        if let Some(socket) = get_config_opt("DON_DOCKER_SOCKET") {
            config.docker.socket = PathBuf::from(socket);
        }

        config
    }

    /// `<plugin dir>/<name>.sock`
    pub fn socket_path(&self) -> PathBuf {
        self.plugin_dir.join(format!("{}.sock", self.name))
    }
}
