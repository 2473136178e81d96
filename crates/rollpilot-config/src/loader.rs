use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use rollpilot_core::PilotError;

use crate::schema::RollpilotConfig;

/// Loads and optionally hot-reloads the rollpilot configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<RollpilotConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > ROLLPILOT_CONFIG env > ~/.rollpilot/rollpilot.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("ROLLPILOT_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rollpilot")
            .join("rollpilot.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> rollpilot_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            Self::parse(&raw, &config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            RollpilotConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        // Validate config: log warnings, fail on errors
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(PilotError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> RollpilotConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<RollpilotConfig>> {
        Arc::clone(&self.config)
    }

    /// Path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn parse(raw: &str, path: &Path) -> rollpilot_core::Result<RollpilotConfig> {
        toml::from_str::<RollpilotConfig>(raw).map_err(|e| {
            PilotError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (ROLLPILOT_AUTONOMY_LEVEL, ROLLPILOT_READ_ONLY, etc.)
    fn apply_env_overrides(mut config: RollpilotConfig) -> RollpilotConfig {
        if let Ok(v) = std::env::var("ROLLPILOT_AUTONOMY_LEVEL") {
            config.autonomy.level = v.trim().to_uppercase();
        }
        if let Ok(v) = std::env::var("ROLLPILOT_READ_ONLY") {
            config.policy.read_only_mode = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("ROLLPILOT_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("ROLLPILOT_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        // Config file takes priority, env is the fallback.
        if config.policy.api_key.is_none() {
            if let Ok(v) = std::env::var("ROLLPILOT_API_KEY") {
                config.policy.api_key = Some(v);
            }
        }
        config
    }

    /// Reload the config from disk.
    pub fn reload(&self) -> rollpilot_core::Result<()> {
        if !self.config_path.exists() {
            return Err(PilotError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = Self::apply_env_overrides(Self::parse(&raw, &self.config_path)?);
        new_config.validate().map_err(PilotError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that swaps in the new config when the file changes.
    /// Returns a handle to the watcher (must be kept alive for watching to continue).
    pub fn watch(&self) -> rollpilot_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            let is_our_file = event
                .paths
                .iter()
                .any(|p| p.file_name() == path_for_event.file_name());
            if !is_our_file {
                return;
            }

            info!("config file changed, reloading");
            let raw = match std::fs::read_to_string(&path_for_event) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "failed to read config file during hot-reload");
                    return;
                }
            };
            match toml::from_str::<RollpilotConfig>(&raw) {
                Ok(new_config) => {
                    let new_config = ConfigLoader::apply_env_overrides(new_config);
                    if let Err(e) = new_config.validate() {
                        warn!(error = %e, "reloaded config is invalid, keeping current config");
                        return;
                    }
                    *config.write() = new_config;
                    info!("configuration hot-reloaded successfully");
                }
                Err(e) => {
                    warn!(error = %e, "config file has errors, keeping current config");
                }
            }
        })
        .map_err(|e| PilotError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| PilotError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
