//! TOML-based configuration for the client application.
//!
//! Reads and writes `ClientConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\RCPC\client.toml`
//! - Linux:    `~/.config/rcpc/client.toml`
//! - macOS:    `~/Library/Application Support/RCPC/client.toml`
//!
//! Example:
//!
//! ```toml
//! [network]
//! port = 666
//! connect_timeout_ms = 5000
//!
//! [tls]
//! client_cert = "/etc/rcpc/client.pem"
//! client_key = "/etc/rcpc/client.key"
//! trust_anchors = "/etc/rcpc/host-ca.pem"
//!
//! [client]
//! log_level = "debug"
//! ```
//!
//! Every field has a serde default, so a missing file, a missing section, or
//! a file written by an older release all load cleanly.
//!
//! Credential *paths* live here; credential passphrases never do.  Key
//! material is provisioned as PEM files by the deployment, and the paths can
//! be overridden from the environment (see [`TlsSettings::apply_env_overrides`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use rcpc_core::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding [`TlsSettings::client_cert`].
pub const ENV_CLIENT_CERT: &str = "RCPC_CLIENT_CERT";
/// Environment variable overriding [`TlsSettings::client_key`].
pub const ENV_CLIENT_KEY: &str = "RCPC_CLIENT_KEY";
/// Environment variable overriding [`TlsSettings::trust_anchors`].
pub const ENV_TRUST_ANCHORS: &str = "RCPC_TRUST_ANCHORS";

const CONFIG_FILE_NAME: &str = "client.toml";
const DEVICE_ID_FILE_NAME: &str = "device_id";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub tls: TlsSettings,
}

/// General client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSettings {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where the per-install device identifier is kept.  Defaults to a file
    /// next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id_path: Option<PathBuf>,
    /// Swap primary and secondary touchpad buttons (left-handed layout).
    #[serde(default)]
    pub invert_touchpad_buttons: bool,
}

/// Transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// TCP port of the host application.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for TCP connect plus TLS handshake.
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for the host's accept/refuse verdict.
    #[serde(default = "default_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Deadline for the closing envelope plus TLS close_notify.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Enable `SO_KEEPALIVE` on the control socket.
    #[serde(default = "default_true")]
    pub tcp_keepalive: bool,
}

/// Locations of the mutual-TLS credential material.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSettings {
    /// PEM certificate chain presented to the host, leaf first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    /// PEM PKCS#8 (or PKCS#1 / SEC1) private key matching `client_cert`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    /// PEM certificate(s) the host's certificate must chain to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_anchors: Option<PathBuf>,
    /// Name to verify the host certificate against.  Defaults to the host
    /// part of the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Refuse to connect when the credential material could not be loaded.
    #[serde(default = "default_true")]
    pub require_mutual_auth: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_close_timeout_ms() -> u64 {
    2000
}
fn default_true() -> bool {
    true
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_id_path: None,
            invert_touchpad_buttons: false,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_ms: default_timeout_ms(),
            handshake_timeout_ms: default_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            tcp_keepalive: default_true(),
        }
    }
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            client_cert: None,
            client_key: None,
            trust_anchors: None,
            server_name: None,
            require_mutual_auth: default_true(),
        }
    }
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl TlsSettings {
    /// Replaces credential paths with the values of [`ENV_CLIENT_CERT`],
    /// [`ENV_CLIENT_KEY`], and [`ENV_TRUST_ANCHORS`] where those are set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var_os(name));
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<std::ffi::OsString>) {
        if let Some(path) = lookup(ENV_CLIENT_CERT) {
            self.client_cert = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_CLIENT_KEY) {
            self.client_key = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup(ENV_TRUST_ANCHORS) {
            self.trust_anchors = Some(PathBuf::from(path));
        }
    }
}

impl ClientConfig {
    /// Resolves the device-identifier file, falling back to the platform
    /// config directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPlatformConfigDir`] when no explicit path is
    /// configured and the platform directory cannot be determined.
    pub fn device_id_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.client.device_id_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(DEVICE_ID_FILE_NAME)),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for client state.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Loads `ClientConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `ClientConfig` from `path`, returning `ClientConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ClientConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `RCPC` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RCPC"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("rcpc"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RCPC")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
