use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::ShellConfig;
use crate::db::{schema, StoreConfig, Timeouts};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL the application shell is served from
  pub origin: String,
  /// Where the store, bucket storage and logs live (default: $XDG_DATA_HOME/minigram)
  pub data_dir: Option<PathBuf>,
  /// Per-request network timeout
  pub fetch_timeout_ms: u64,
  pub shell: ShellConfig,
  pub store: StoreSettings,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      data_dir: None,
      fetch_timeout_ms: 10_000,
      shell: ShellConfig::default(),
      store: StoreSettings::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
  /// Record schema version; raising it creates missing collections on next open
  pub schema_version: u32,
  pub timeouts: Timeouts,
}

impl Default for StoreSettings {
  fn default() -> Self {
    Self {
      schema_version: schema::LATEST_VERSION,
      timeouts: Timeouts::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./minigram.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/minigram/config.yaml
  ///
  /// Without a file the built-in defaults are used. `MINIGRAM_ORIGIN`
  /// overrides the origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("minigram.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("minigram").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.shell.version.trim().is_empty() {
      return Err(eyre!("shell.version must not be empty"));
    }
    Ok(config)
  }

  fn with_env_overrides(mut self) -> Self {
    if let Ok(origin) = std::env::var("MINIGRAM_ORIGIN") {
      if !origin.is_empty() {
        self.origin = origin;
      }
    }
    self
  }

  /// Directory holding all local state.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("minigram"))
  }

  pub fn store_config(&self) -> Result<StoreConfig> {
    Ok(StoreConfig {
      path: self.data_dir()?.join("minigram.db"),
      schema_version: self.store.schema_version,
      timeouts: self.store.timeouts,
    })
  }

  pub fn bucket_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("shell-cache.db"))
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }
}
