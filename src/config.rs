use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::model::MaxAge;

/// Environment variable that overrides the configured bearer token.
pub const TOKEN_ENV: &str = "BIRDWATCH_BEARER_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Default max age of cached pages, in seconds
  pub cache_expiry: u64,
  /// Default number of records fetched per post query
  pub fetch_limit: usize,
  /// How long resolved screen names are remembered, in seconds
  pub resolve_ttl: u64,
  /// Cache database location (defaults to the user data directory)
  pub cache_path: Option<PathBuf>,
  pub api: ApiConfig,
  pub credentials: Credentials,
  pub retry: RetryConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_expiry: 86_400,
      fetch_limit: 100,
      resolve_ttl: 900,
      cache_path: None,
      api: ApiConfig::default(),
      credentials: Credentials::default(),
      retry: RetryConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Records requested per timeline page
  pub page_size: u32,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.twitter.com/1.1/".to_string(),
      page_size: 200,
      timeout_secs: 30,
    }
  }
}

/// Opaque credential bundle. Only the bearer token is used for requests.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct Credentials {
  pub bearer_token: Option<String>,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

impl Credentials {
  /// Get the bearer token.
  ///
  /// Checks BIRDWATCH_BEARER_TOKEN first, then the config file.
  pub fn token(&self) -> Result<String> {
    std::env::var(TOKEN_ENV)
      .ok()
      .filter(|t| !t.is_empty())
      .or_else(|| self.bearer_token.clone())
      .ok_or_else(|| {
        eyre!(
          "Bearer token not found. Set {} or credentials.bearer_token in the config file.",
          TOKEN_ENV
        )
      })
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_secs: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      base_delay_ms: 500,
      max_delay_secs: 900,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./birdwatch.yaml (current directory)
  /// 3. <platform config dir>/birdwatch/config.yaml ($XDG_CONFIG_HOME on Linux)
  /// 4. ~/.config/birdwatch/config.yaml
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
        "No configuration file found. Create one at ~/.config/birdwatch/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    candidate_paths(dirs::config_dir(), dirs::home_dir())
      .into_iter()
      .find(|path| path.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Default freshness threshold for reads.
  pub fn max_age(&self) -> MaxAge {
    MaxAge::seconds(self.cache_expiry.min(i64::MAX as u64) as i64)
  }

  pub fn resolve_ttl(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.resolve_ttl)
  }
}

/// Config file locations in search order, without duplicates.
fn candidate_paths(config_dir: Option<PathBuf>, home_dir: Option<PathBuf>) -> Vec<PathBuf> {
  let mut paths = vec![PathBuf::from("birdwatch.yaml")];
  let platform = config_dir.map(|dir| dir.join("birdwatch").join("config.yaml"));
  let home = home_dir.map(|dir| dir.join(".config").join("birdwatch").join("config.yaml"));
  for path in [platform, home].into_iter().flatten() {
    if !paths.contains(&path) {
      paths.push(path);
    }
  }
  paths
}
