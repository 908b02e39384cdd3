//! Configuration loading and persistence.
//!
//! Handles the TOML config file (~/.config/evdash/config.toml): a single
//! `[source]` section selected by `kind`, a `[geocoder]` section, and
//! indexed `[webserver.<id>]` sections.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

// Re-export config types from the schema crate for crate-internal use
pub use evdash::{EvdashConfig, SourceSection};

/// Build a global ID from a type prefix and index: `"webserver.0"`.
pub fn global_id(prefix: &str, index: &str) -> String {
    format!("{prefix}.{index}")
}

/// Generate a short unique ID (8 hex chars from system time).
/// Used for WebSocket source IDs (`ws.{hex}`).
pub fn generate_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:08x}", (ts ^ (seq as u64)) as u32)
}

// ---------------------------------------------------------------------------
// Persistence I/O
// ---------------------------------------------------------------------------

/// Returns `~/.config/evdash/config.toml`.
pub fn default_config_path() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evdash");
    dir.join("config.toml")
}

/// Parse config text. Missing sections take their defaults.
pub fn parse(contents: &str) -> Result<EvdashConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load persisted config from disk. If the file does not exist, creates it
/// with all-defaults and returns that. An unreadable or unparseable file is
/// logged and replaced by defaults in memory (the file is left untouched).
pub fn load(path: &Path) -> EvdashConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match parse(&contents) {
            Ok(config) => {
                tracing::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                EvdashConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let defaults = EvdashConfig::default();
            tracing::info!("no config file found, creating {}", path.display());
            save_to(path, &defaults);
            defaults
        }
        Err(e) => {
            tracing::warn!("failed to read {}: {e}", path.display());
            EvdashConfig::default()
        }
    }
}

/// Write config to a specific path. Creates parent dirs if needed. Never panics.
pub fn save_to(path: &Path, config: &EvdashConfig) {
    if let Some(dir) = path.parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        tracing::warn!("failed to create config dir {}: {e}", dir.display());
        return;
    }
    match toml::to_string_pretty(config) {
        Ok(contents) => {
            if let Err(e) = std::fs::write(path, contents) {
                tracing::warn!("failed to write {}: {e}", path.display());
            }
        }
        Err(e) => {
            tracing::warn!("failed to serialize config: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Cached config
// ---------------------------------------------------------------------------

/// Cached configuration for the running process.
///
/// Reads are cheap (RwLock read guard + clone). Command-line overrides are
/// applied in memory with `override_with()` and never written back.
pub struct SystemConfig {
    path: PathBuf,
    inner: RwLock<EvdashConfig>,
}

impl SystemConfig {
    /// Load config from disk (or create defaults) and cache it.
    pub fn new(path: PathBuf) -> Self {
        let config = load(&path);
        Self {
            path,
            inner: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone the current cached config.
    pub fn snapshot(&self) -> EvdashConfig {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Mutate the cached config for this run only.
    pub fn override_with(&self, f: impl FnOnce(&mut EvdashConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}
