use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub sync: SyncConfig,
  /// Identity on whose behalf offline mutations are recorded.
  pub principal: String,
  /// Override for the local database location (defaults to the platform
  /// data directory).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Base URL of the reconciliation server.
  pub server_url: String,
  /// Hard bound on one sync pass, in seconds.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

impl SyncConfig {
  /// Parsed and validated server URL.
  pub fn server_url(&self) -> Result<Url> {
    Url::parse(&self.server_url)
      .map_err(|e| eyre!("Invalid sync server URL {}: {}", self.server_url, e))
  }

  /// Hard bound on one sync pass.
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lectern.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lectern/config.yaml
  /// 4. ~/.config/lectern/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/lectern/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lectern.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lectern").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the sync bearer token from environment variables.
  ///
  /// Checks LECTERN_SYNC_TOKEN first, then SYNC_TOKEN as fallback.
  pub fn get_sync_token() -> Result<String> {
    std::env::var("LECTERN_SYNC_TOKEN")
      .or_else(|_| std::env::var("SYNC_TOKEN"))
      .map_err(|_| {
        eyre!("Sync token not found. Set LECTERN_SYNC_TOKEN or SYNC_TOKEN environment variable.")
      })
  }
}
