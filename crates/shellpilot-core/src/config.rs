//! Configuration for shellpilot.
//!
//! Two kinds of configuration live here:
//!
//! - The [`ConfigStore`]: the environment-like key/value store the fixture
//!   reads the ambient grid unit from and patches before launching the shell.
//!   Access is narrowed to the keys in [`ConfigKey`]; nothing else in the
//!   process environment is reachable through it.
//! - [`PilotConfig`]: persistent user settings stored in
//!   `~/.shellpilot/config.json` (build directory, installed lib directory,
//!   LightDM mock flavour, platform model, dash timeout).
//!
//! # Example
//!
//! ```no_run
//! use shellpilot_core::config::{ConfigKey, ConfigStore, ProcessEnv, PilotConfig};
//!
//! let settings = PilotConfig::load();
//! println!("LightDM mock: {}", settings.lightdm_mock);
//!
//! let mut env = ProcessEnv::new();
//! env.set(ConfigKey::GridUnitPx, "9".to_string());
//! // ... launch ...
//! env.restore();
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const CONFIG_FILENAME: &str = "config.json";

/// Errors in the fixture's configuration inputs.
///
/// These are surfaced immediately and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `GRID_UNIT_PX` was needed but is not set.
    #[error("GRID_UNIT_PX is not set")]
    MissingGridUnit,

    /// `GRID_UNIT_PX` is set but is not an integer.
    #[error("GRID_UNIT_PX is not an integer: '{0}'")]
    InvalidGridUnit(String),

    /// The screen reported a zero dimension.
    #[error("invalid screen size {width}x{height}: both dimensions must be positive")]
    InvalidScreen { width: u32, height: u32 },

    /// A scale divisor that is not a power of two.
    #[error("invalid scale divisor {0}: must be a power of two")]
    InvalidDivisor(u32),

    /// A `WxH` string could not be parsed.
    #[error("invalid size '{0}': expected WIDTHxHEIGHT")]
    InvalidSize(String),
}

/// The keys the fixture is allowed to read or patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Pixels per grid unit used by the shell.
    GridUnitPx,
    /// QML import search path; points at the mock QML modules.
    Qml2ImportPath,
    /// Library search path; points at the mock native libraries.
    LdLibraryPath,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 3] = [
        ConfigKey::GridUnitPx,
        ConfigKey::Qml2ImportPath,
        ConfigKey::LdLibraryPath,
    ];

    /// The environment variable backing this key.
    pub fn env_name(&self) -> &'static str {
        match self {
            ConfigKey::GridUnitPx => "GRID_UNIT_PX",
            ConfigKey::Qml2ImportPath => "QML2_IMPORT_PATH",
            ConfigKey::LdLibraryPath => "LD_LIBRARY_PATH",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.env_name())
    }
}

/// Environment-like key/value store, narrowed to [`ConfigKey`].
///
/// Values written through [`set`](ConfigStore::set) must be visible to later
/// [`get`](ConfigStore::get) calls and are reported by
/// [`patches`](ConfigStore::patches) so the launcher can hand them to the
/// child process explicitly.
pub trait ConfigStore {
    fn get(&self, key: ConfigKey) -> Option<String>;

    fn set(&mut self, key: ConfigKey, value: String);

    /// Every key patched through this store, with its current value, in the
    /// order the keys were first patched.
    fn patches(&self) -> Vec<(ConfigKey, String)>;

    /// Undo every patch made through this store.
    fn restore(&mut self);
}

/// Records the first-seen original value of each patched key.
#[derive(Debug, Default, Clone)]
struct PatchLog {
    order: Vec<ConfigKey>,
    originals: HashMap<ConfigKey, Option<String>>,
}

impl PatchLog {
    fn record(&mut self, key: ConfigKey, original: Option<String>) {
        if !self.originals.contains_key(&key) {
            self.order.push(key);
            self.originals.insert(key, original);
        }
    }

    fn drain(&mut self) -> Vec<(ConfigKey, Option<String>)> {
        let mut originals = std::mem::take(&mut self.originals);
        std::mem::take(&mut self.order)
            .into_iter()
            .map(|key| {
                let original = originals.remove(&key).flatten();
                (key, original)
            })
            .collect()
    }
}

/// [`ConfigStore`] backed by the real process environment.
///
/// Patched variables are inherited by any child process spawned afterwards.
/// [`restore`](ConfigStore::restore) puts back the values that were present
/// before the first patch of each key.
#[derive(Debug, Default)]
pub struct ProcessEnv {
    log: PatchLog,
}

impl ProcessEnv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for ProcessEnv {
    fn get(&self, key: ConfigKey) -> Option<String> {
        std::env::var(key.env_name()).ok()
    }

    fn set(&mut self, key: ConfigKey, value: String) {
        self.log.record(key, self.get(key));
        debug!(key = key.env_name(), value = %value, "Patching environment");
        std::env::set_var(key.env_name(), value);
    }

    fn patches(&self) -> Vec<(ConfigKey, String)> {
        self.log
            .order
            .iter()
            .filter_map(|key| self.get(*key).map(|value| (*key, value)))
            .collect()
    }

    fn restore(&mut self) {
        for (key, original) in self.log.drain() {
            match original {
                Some(value) => std::env::set_var(key.env_name(), value),
                None => std::env::remove_var(key.env_name()),
            }
        }
    }
}

/// In-memory [`ConfigStore`], for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<ConfigKey, String>,
    log: PatchLog,
}

impl MemoryStore {
    /// Seed a value without recording it as a patch.
    pub fn with(mut self, key: ConfigKey, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: ConfigKey) -> Option<String> {
        self.values.get(&key).cloned()
    }

    fn set(&mut self, key: ConfigKey, value: String) {
        self.log.record(key, self.values.get(&key).cloned());
        self.values.insert(key, value);
    }

    fn patches(&self) -> Vec<(ConfigKey, String)> {
        self.log
            .order
            .iter()
            .filter_map(|key| self.values.get(key).map(|value| (*key, value.clone())))
            .collect()
    }

    fn restore(&mut self) {
        for (key, original) in self.log.drain() {
            match original {
                Some(value) => self.values.insert(key, value),
                None => self.values.remove(&key),
            };
        }
    }
}

/// Returns the shellpilot data directory (`~/.shellpilot/`).
///
/// Falls back to the current directory when no home directory is known.
/// Creates the directory if it doesn't exist.
pub fn pilot_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shellpilot");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Returns the logs directory path (`~/.shellpilot/logs/`).
pub fn logs_dir() -> PathBuf {
    let dir = pilot_dir().join("logs");
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Persistent shellpilot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Local build directory. When `<build_dir>/unity8` exists the local
    /// build is launched instead of the installed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<PathBuf>,

    /// Override for the installed lib directory
    /// (default `/usr/lib/<multiarch>/unity8`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lib_dir: Option<PathBuf>,

    /// Multiarch triplet, e.g. `x86_64-linux-gnu`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiarch: Option<String>,

    /// Which LightDM mock library to put on the library path.
    #[serde(default = "default_lightdm_mock")]
    pub lightdm_mock: String,

    /// Platform model; `"Desktop"` unless running on a device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// How long to wait for the dash to finish loading after launch.
    #[serde(default = "default_dash_timeout_ms")]
    pub dash_timeout_ms: u64,
}

fn default_lightdm_mock() -> String {
    "full".to_string()
}

fn default_dash_timeout_ms() -> u64 {
    10_000
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            build_dir: None,
            lib_dir: None,
            multiarch: None,
            lightdm_mock: default_lightdm_mock(),
            model: None,
            dash_timeout_ms: default_dash_timeout_ms(),
        }
    }
}

impl PilotConfig {
    /// Path of the settings file.
    pub fn path() -> PathBuf {
        pilot_dir().join(CONFIG_FILENAME)
    }

    /// Load config from `~/.shellpilot/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, falling back to [`Default`].
    pub fn load_from(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save config to `~/.shellpilot/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path` as pretty-printed JSON.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// The platform model, defaulting to the desktop model.
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or(crate::form_factor::DESKTOP_MODEL)
    }
}
