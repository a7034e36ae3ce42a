//! In-memory cache storage.

use color_eyre::{eyre::eyre, Result};
use std::sync::Mutex;

use super::storage::CacheStorage;
use crate::http::{RequestKey, Response};

#[derive(Default)]
struct NamedCache {
  name: String,
  entries: Vec<(RequestKey, Response)>,
}

/// Insertion-ordered storage held entirely in memory.
#[derive(Default)]
pub struct MemoryStorage {
  caches: Mutex<Vec<NamedCache>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn with_caches<T>(&self, f: impl FnOnce(&mut Vec<NamedCache>) -> T) -> Result<T> {
    let mut caches = self
      .caches
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(f(&mut caches))
  }
}

fn find_or_create<'a>(caches: &'a mut Vec<NamedCache>, name: &str) -> &'a mut NamedCache {
  let idx = match caches.iter().position(|c| c.name == name) {
    Some(idx) => idx,
    None => {
      caches.push(NamedCache {
        name: name.to_string(),
        entries: Vec::new(),
      });
      caches.len() - 1
    }
  };
  &mut caches[idx]
}

impl CacheStorage for MemoryStorage {
  fn cache_names(&self) -> Result<Vec<String>> {
    self.with_caches(|caches| caches.iter().map(|c| c.name.clone()).collect())
  }

  fn open(&self, cache: &str) -> Result<()> {
    self.with_caches(|caches| {
      find_or_create(caches, cache);
    })
  }

  fn delete_cache(&self, cache: &str) -> Result<bool> {
    self.with_caches(|caches| {
      let before = caches.len();
      caches.retain(|c| c.name != cache);
      caches.len() != before
    })
  }

  fn match_entry(&self, cache: &str, key: &RequestKey) -> Result<Option<Response>> {
    self.with_caches(|caches| {
      caches
        .iter()
        .find(|c| c.name == cache)
        .and_then(|c| c.entries.iter().find(|(k, _)| k == key))
        .map(|(_, response)| response.clone())
    })
  }

  fn put(&self, cache: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.with_caches(|caches| {
      let named = find_or_create(caches, cache);
      named.entries.retain(|(k, _)| k != key);
      named.entries.push((key.clone(), response.clone()));
    })
  }

  fn delete(&self, cache: &str, key: &RequestKey) -> Result<bool> {
    self.with_caches(|caches| match caches.iter_mut().find(|c| c.name == cache) {
      Some(named) => {
        let before = named.entries.len();
        named.entries.retain(|(k, _)| k != key);
        named.entries.len() != before
      }
      None => false,
    })
  }

  fn keys(&self, cache: &str) -> Result<Vec<RequestKey>> {
    self.with_caches(|caches| {
      caches
        .iter()
        .find(|c| c.name == cache)
        .map(|c| c.entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default()
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://shop.test/").unwrap().join(path).unwrap();
    RequestKey::new("GET", &url)
  }

  #[test]
  fn test_rewrite_moves_key_to_back() {
    let storage = MemoryStorage::new();
    let body = Response::ok("x", "image/png");

    storage.put("images", &key("/1.png"), &body).unwrap();
    storage.put("images", &key("/2.png"), &body).unwrap();
    storage.put("images", &key("/1.png"), &body).unwrap();

    assert_eq!(
      storage.keys("images").unwrap(),
      vec![key("/2.png"), key("/1.png")]
    );
  }

  #[test]
  fn test_delete_entry_and_cache() {
    let storage = MemoryStorage::new();
    storage
      .put("a", &key("/x"), &Response::ok("x", "text/plain"))
      .unwrap();

    assert!(storage.delete("a", &key("/x")).unwrap());
    assert!(!storage.delete("a", &key("/x")).unwrap());
    assert!(storage.delete_cache("a").unwrap());
    assert!(storage.cache_names().unwrap().is_empty());
  }
}
