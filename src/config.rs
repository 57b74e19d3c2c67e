use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::route::DEFAULT_BYPASS_PATTERNS;

/// Resources needed to boot the wallet offline
const DEFAULT_SHELL: &[&str] = &[
  "/",
  "/index.html",
  "/manifest.json",
  "/assets/generated/nurpay-icon-192.dim_192x192.png",
  "/assets/generated/nurpay-icon-512.dim_512x512.png",
  "/assets/generated/nuropay-logo.dim_128x128.png",
  "/assets/generated/nurpay-logo.dim_80x80.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the application shell is served from
  pub origin: String,
  pub cache: CacheConfig,
  /// App shell manifest, absolute paths resolved against `origin`
  pub shell: Vec<String>,
  /// Requests matching any of these are never cached
  pub bypass: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      cache: CacheConfig::default(),
      shell: DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
      bypass: DEFAULT_BYPASS_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix; partitions starting with `{prefix}-` belong to us
  pub prefix: String,
  /// Bumping this orphans every partition of the previous version
  pub version: String,
  pub storage: StorageKind,
  /// Database path (default: $XDG_DATA_HOME/nurpay-sw/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "nurpay".to_string(),
      version: "v1".to_string(),
      storage: StorageKind::default(),
      path: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process-local, for dry runs
  Memory,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./nurpay-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/nurpay-sw/config.yaml
  ///
  /// Without any file the built-in defaults apply.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Some(origin) = Self::get_origin_override() {
      config.origin = origin;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("nurpay-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("nurpay-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the origin override from the environment.
  ///
  /// Checks NURPAY_SW_ORIGIN.
  fn get_origin_override() -> Option<String> {
    std::env::var("NURPAY_SW_ORIGIN")
      .ok()
      .filter(|s| !s.is_empty())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Shell manifest entries as absolute URLs
  pub fn shell_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .shell
      .iter()
      .map(|path| {
        origin
          .join(path)
          .map_err(|e| eyre!("Invalid shell entry '{}': {}", path, e))
      })
      .collect()
  }

  /// Resolve a CLI argument that may be a path or an absolute URL
  pub fn resolve(&self, target: &str) -> Result<Url> {
    match Url::parse(target) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .origin_url()?
        .join(target)
        .map_err(|e| eyre!("Invalid URL '{}': {}", target, e)),
      Err(e) => Err(eyre!("Invalid URL '{}': {}", target, e)),
    }
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

/// Application data directory
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("nurpay-sw"))
}
