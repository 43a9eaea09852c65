use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Assets every installed generation must contain.
const CORE_ASSETS: &[&str] = &[
  "./",
  "./index.html",
  "./manifest.json",
  "./robots.txt",
  "./css/style.css",
  "./js/app.js",
  "./images/1.jpg",
  "./images/2.jpg",
  "./images/3.jpg",
  "./images/4.jpg",
  "./images/5.jpg",
  "./images/icons/icon-72.png",
  "./images/icons/icon-96.png",
  "./images/icons/icon-128.png",
  "./images/icons/icon-144.png",
  "./images/icons/icon-192.png",
  "./images/icons/icon-256.png",
  "./images/icons/icon-384.png",
  "./images/icons/icon-512.png",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Application namespace shared by all cache generations
  pub app_name: String,
  /// Version of the current generation (e.g. "v2.0.0")
  pub version: String,
  /// Base URL the site is served from; manifest paths resolve against it
  pub origin: String,
  /// Ordered list of assets fetched at install time
  pub manifest: Vec<String>,
  /// Image served when an image can't be fetched or found in the cache
  pub placeholder_image: String,
  /// Document served when an HTML page can't be fetched or found in the cache
  pub root_document: String,
  pub storage: StorageBackend,
  /// SQLite database path (default: $XDG_DATA_HOME/campus-cache/cache.db)
  pub database: Option<PathBuf>,
  pub log_level: String,
  /// Write logs to daily files in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  #[default]
  Sqlite,
  /// Keep generations in memory only (useful with `run`)
  Memory,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      app_name: "BCIT Campus Maps".to_string(),
      version: "v2.0.0".to_string(),
      origin: "http://localhost:8080/".to_string(),
      manifest: CORE_ASSETS.iter().map(|s| s.to_string()).collect(),
      placeholder_image: "./images/1.jpg".to_string(),
      root_document: "./index.html".to_string(),
      storage: StorageBackend::default(),
      database: None,
      log_level: "info".to_string(),
      log_dir: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./campus-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/campus-cache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("campus-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("campus-cache").join("config.yaml");
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

    if config.app_name.trim().is_empty() {
      return Err(eyre!("app_name must not be empty"));
    }
    if config.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if config.manifest.is_empty() {
      return Err(eyre!("manifest must list at least one asset"));
    }

    Ok(config)
  }

  /// Get the SQLite database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("campus-cache").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_deployed_site() {
    let config = Config::default();
    assert_eq!(config.app_name, "BCIT Campus Maps");
    assert_eq!(config.version, "v2.0.0");
    assert_eq!(config.manifest.len(), 19);
    assert_eq!(config.manifest[0], "./");
    assert_eq!(config.placeholder_image, "./images/1.jpg");
    assert_eq!(config.storage, StorageBackend::Sqlite);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      "version: v2.1.0\norigin: https://maps.example.edu/campus/\nstorage: memory\n",
    )
    .unwrap();

    assert_eq!(config.app_name, "BCIT Campus Maps");
    assert_eq!(config.version, "v2.1.0");
    assert_eq!(config.origin, "https://maps.example.edu/campus/");
    assert_eq!(config.storage, StorageBackend::Memory);
    assert_eq!(config.manifest.len(), 19);
  }

  #[test]
  fn test_custom_manifest() {
    let config = Config::parse("manifest:\n  - /\n  - /index.html\n  - /images/1.jpg\n").unwrap();
    assert_eq!(config.manifest, vec!["/", "/index.html", "/images/1.jpg"]);
  }

  #[test]
  fn test_rejects_empty_manifest() {
    assert!(Config::parse("manifest: []\n").is_err());
  }

  #[test]
  fn test_rejects_blank_version() {
    assert!(Config::parse("version: \"  \"\n").is_err());
  }

  #[test]
  fn test_unknown_storage_backend_is_an_error() {
    assert!(Config::parse("storage: redis\n").is_err());
  }

  #[test]
  fn test_explicit_database_path() {
    let config = Config::parse("database: /tmp/campus.db\n").unwrap();
    assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/campus.db"));
  }

  #[test]
  fn test_missing_explicit_file() {
    let err = Config::load(Some(Path::new("/nonexistent/campus-cache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
