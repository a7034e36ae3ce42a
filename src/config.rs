use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::push::NotificationTemplate;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin whose same-origin GET traffic is handled
  pub origin: String,
  /// Version stamp embedded in every cache tier name
  pub version: String,
  /// Prefix for cache tier names
  pub cache_prefix: String,
  /// Name shown on the offline page
  pub app_name: String,
  /// Maximum number of entries in the image tier
  pub image_cache_limit: usize,
  /// How long a dynamic entry stays eligible as an offline fallback
  pub dynamic_ttl_secs: u64,
  /// Timeout for each network request
  pub request_timeout_secs: u64,
  /// Assets pre-warmed into the critical tier on install
  pub critical_assets: Vec<String>,
  pub endpoints: EndpointsConfig,
  /// Template that push payloads are merged over
  pub push: NotificationTemplate,
  pub routes: RoutesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
  /// Where queued analytics events are posted
  pub analytics: String,
  /// Where content updates are polled from
  pub content_updates: String,
}

/// Notification click destinations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  pub shop: String,
  pub view: String,
  pub default: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      version: "2.0.0".to_string(),
      cache_prefix: "storefront".to_string(),
      app_name: "Storefront".to_string(),
      image_cache_limit: 50,
      dynamic_ttl_secs: 300,
      request_timeout_secs: 30,
      critical_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/sw.js".to_string(),
      ],
      endpoints: EndpointsConfig::default(),
      push: NotificationTemplate::default(),
      routes: RoutesConfig::default(),
    }
  }
}

impl Default for EndpointsConfig {
  fn default() -> Self {
    Self {
      analytics: "/api/analytics".to_string(),
      content_updates: "/api/content-updates".to_string(),
    }
  }
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      shop: "/#product-hero".to_string(),
      view: "/#testimonials".to_string(),
      default: "/".to_string(),
    }
  }
}

impl RoutesConfig {
  /// Destination for a notification action. Unknown or missing actions go to the default route.
  pub fn target_for(&self, action: Option<&str>) -> &str {
    match action {
      Some("shop") => &self.shop,
      Some("view") => &self.view,
      _ => &self.default,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
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
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    // The image tier must keep room for the entry being written
    if self.image_cache_limit == 0 {
      return Err(eyre!("image_cache_limit must be at least 1"));
    }
    Ok(())
  }

  pub fn dynamic_ttl(&self) -> Duration {
    Duration::from_secs(self.dynamic_ttl_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }
}
