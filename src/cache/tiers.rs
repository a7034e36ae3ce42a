//! Versioned cache tiers.
//!
//! Every tier name embeds the running version stamp, so all tiers of one
//! version are created together and swept together when a newer version
//! activates.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::CacheStorage;
use crate::http::{Request, RequestKey, Response};

/// The logical purpose of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
  /// Pre-warmed must-have assets, also the cache-first static tier
  Critical,
  /// Pages and API responses written by the network-first strategies
  Dynamic,
  /// Images, bounded by entry count
  Image,
  /// Metered runtime tier
  Runtime,
}

impl TierKind {
  pub const ALL: [TierKind; 4] = [
    TierKind::Critical,
    TierKind::Dynamic,
    TierKind::Image,
    TierKind::Runtime,
  ];

  /// Purpose tag.
  pub fn purpose(&self) -> &'static str {
    match self {
      TierKind::Critical => "critical",
      TierKind::Dynamic => "dynamic",
      TierKind::Image => "image",
      TierKind::Runtime => "runtime",
    }
  }

  fn name_segment(&self) -> &'static str {
    match self {
      TierKind::Critical => "static",
      TierKind::Dynamic => "dynamic",
      TierKind::Image => "images",
      TierKind::Runtime => "runtime",
    }
  }
}

/// A named, versioned cache partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTier {
  pub kind: TierKind,
  pub name: String,
  pub version: String,
  /// Only the image tier is bounded
  pub max_entries: Option<usize>,
}

/// Names and isolates the four tiers of one version.
pub struct TierRegistry<S: CacheStorage> {
  storage: Arc<S>,
  prefix: String,
  version: String,
  image_limit: usize,
}

impl<S: CacheStorage> TierRegistry<S> {
  pub fn new(storage: Arc<S>, prefix: &str, version: &str, image_limit: usize) -> Self {
    Self {
      storage,
      prefix: prefix.to_string(),
      version: version.to_string(),
      image_limit,
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Describe a tier of the running version.
  pub fn tier(&self, kind: TierKind) -> CacheTier {
    CacheTier {
      kind,
      name: format!("{}-{}-v{}", self.prefix, kind.name_segment(), self.version),
      version: self.version.clone(),
      max_entries: match kind {
        TierKind::Image => Some(self.image_limit),
        _ => None,
      },
    }
  }

  /// Cache names that belong to the running version.
  pub fn current_names(&self) -> Vec<String> {
    TierKind::ALL.iter().map(|k| self.tier(*k).name).collect()
  }

  /// Open (creating if needed) a tier of the running version.
  pub fn open(&self, kind: TierKind) -> Result<CacheHandle<S>> {
    let tier = self.tier(kind);
    self.storage.open(&tier.name)?;
    Ok(CacheHandle {
      tier,
      storage: Arc::clone(&self.storage),
    })
  }

  /// Delete every cache whose name is not one of the running version's tiers.
  ///
  /// Deletion is per cache name and all-or-nothing. A failed deletion is
  /// logged and skipped; the cache gets another chance on the next activation.
  pub fn delete_stale(&self) -> Result<Vec<String>> {
    let current = self.current_names();
    let mut deleted = Vec::new();

    for name in self.storage.cache_names()? {
      if current.contains(&name) {
        continue;
      }

      match self.storage.delete_cache(&name) {
        Ok(true) => {
          info!(cache = %name, "removed stale cache");
          deleted.push(name);
        }
        Ok(false) => debug!(cache = %name, "stale cache already gone"),
        Err(e) => warn!(cache = %name, error = %e, "failed to remove stale cache"),
      }
    }

    Ok(deleted)
  }
}

/// An opened tier.
pub struct CacheHandle<S: CacheStorage> {
  tier: CacheTier,
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheHandle<S> {
  pub fn tier(&self) -> &CacheTier {
    &self.tier
  }

  pub fn name(&self) -> &str {
    &self.tier.name
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.storage.match_entry(&self.tier.name, &request.key())
  }

  /// Store a response. Only GET requests are ever cached.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    if !request.is_get() {
      return Err(eyre!(
        "Refusing to cache {} {}: only GET responses are cacheable",
        request.method,
        request.url
      ));
    }
    self.storage.put(&self.tier.name, &request.key(), response)
  }

  pub fn delete(&self, key: &RequestKey) -> Result<bool> {
    self.storage.delete(&self.tier.name, key)
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.keys(&self.tier.name)
  }
}

impl<S: CacheStorage> Clone for CacheHandle<S> {
  fn clone(&self) -> Self {
    Self {
      tier: self.tier.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use url::Url;

  fn registry(storage: Arc<MemoryStorage>, version: &str) -> TierRegistry<MemoryStorage> {
    TierRegistry::new(storage, "shop", version, 50)
  }

  #[test]
  fn test_tier_names_embed_version() {
    let registry = registry(Arc::new(MemoryStorage::new()), "2.0.0");
    assert_eq!(
      registry.current_names(),
      vec![
        "shop-static-v2.0.0",
        "shop-dynamic-v2.0.0",
        "shop-images-v2.0.0",
        "shop-runtime-v2.0.0",
      ]
    );
    assert_eq!(registry.tier(TierKind::Image).max_entries, Some(50));
    assert_eq!(registry.tier(TierKind::Dynamic).max_entries, None);
  }

  #[test]
  fn test_delete_stale_keeps_current_version() {
    let storage = Arc::new(MemoryStorage::new());
    let old = registry(Arc::clone(&storage), "1.0.0");
    let older = registry(Arc::clone(&storage), "0.9.0");
    let current = registry(Arc::clone(&storage), "2.0.0");

    for kind in TierKind::ALL {
      old.open(kind).unwrap();
      older.open(kind).unwrap();
      current.open(kind).unwrap();
    }

    let deleted = current.delete_stale().unwrap();
    assert_eq!(deleted.len(), 8);

    let remaining = storage.cache_names().unwrap();
    assert_eq!(remaining, current.current_names());
  }

  #[test]
  fn test_put_refuses_non_get() {
    let registry = registry(Arc::new(MemoryStorage::new()), "1");
    let cache = registry.open(TierKind::Dynamic).unwrap();
    let url = Url::parse("https://shop.test/api/cart").unwrap();

    let post = Request::new("POST", url.clone());
    assert!(cache.put(&post, &Response::ok("{}", "application/json")).is_err());
    assert!(cache.keys().unwrap().is_empty());

    let get = Request::get(url);
    cache.put(&get, &Response::ok("{}", "application/json")).unwrap();
    assert!(cache.match_request(&get).unwrap().is_some());
  }
}
