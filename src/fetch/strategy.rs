//! Fetch strategies over the cache tiers.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::classify::Route;
use super::fallback;
use crate::cache::{eviction, CacheHandle, CacheStorage, TierKind, TierRegistry};
use crate::http::{Request, Response};
use crate::network::Network;

/// Synthetic header holding the epoch-millisecond write time of a dynamic entry.
pub const CACHED_AT_HEADER: &str = "sw-cached-at";

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live from the network
  Network,
  /// Read back from a cache tier
  Cache,
  /// Synthesized stand-in
  Fallback,
}

/// A response together with its source.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn fallback(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Fallback,
    }
  }
}

/// Whether a dynamic entry written at `cached_at` may still be served.
///
/// A missing stamp is always eligible, an unreadable one never is. An entry
/// exactly `ttl` old is still eligible.
pub fn within_ttl(cached_at: Option<&str>, now_ms: i64, ttl: Duration) -> bool {
  let Some(raw) = cached_at else {
    return true;
  };
  let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
  match raw.trim().parse::<i64>() {
    Ok(at) => at >= now_ms.saturating_sub(ttl_ms),
    Err(_) => false,
  }
}

/// Runs the four strategies against the tiers of the running version.
///
/// Cache storage failures never fail a response: a failed lookup counts as a
/// miss and a failed write just leaves the response uncached.
pub struct StrategyExecutor<S: CacheStorage> {
  registry: Arc<TierRegistry<S>>,
  network: Arc<dyn Network>,
  dynamic_ttl: Duration,
  app_name: String,
}

impl<S: CacheStorage + 'static> StrategyExecutor<S> {
  pub fn new(
    registry: Arc<TierRegistry<S>>,
    network: Arc<dyn Network>,
    dynamic_ttl: Duration,
    app_name: &str,
  ) -> Self {
    Self {
      registry,
      network,
      dynamic_ttl,
      app_name: app_name.to_string(),
    }
  }

  /// Serve a request along its route.
  pub async fn execute(&self, route: Route, request: &Request) -> Result<Served> {
    match route {
      Route::PassThrough => Ok(Served::from_network(self.network.fetch(request).await?)),
      Route::Image => self.stale_while_revalidate(request).await,
      Route::Html => self.network_first(request).await,
      Route::StaticAsset => self.cache_first(request).await,
      Route::Dynamic => self.network_first_with_ttl(request).await,
    }
  }

  /// Images: cached copy first with a background refresh, bounded tier on write.
  pub async fn stale_while_revalidate(&self, request: &Request) -> Result<Served> {
    let cache = self.tier(TierKind::Image);

    if let Some(cached) = cache.as_ref().and_then(|c| lookup(c, request)) {
      if let Some(cache) = cache {
        self.revalidate_in_background(cache, request.clone());
      }
      return Ok(Served::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if let (Some(cache), true) = (cache.as_ref(), response.is_ok()) {
          let bound = cache.tier().max_entries.unwrap_or(usize::MAX);
          if let Err(e) = eviction::make_room(cache, bound) {
            warn!(cache = %cache.name(), error = %e, "eviction failed");
          }
          store(cache, request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "image fetch failed, serving placeholder");
        Ok(Served::fallback(fallback::placeholder_image()))
      }
    }
  }

  /// Pages: network first, then the dynamic tier, then the offline page.
  pub async fn network_first(&self, request: &Request) -> Result<Served> {
    let cache = self.tier(TierKind::Dynamic);

    match self.network.fetch(request).await {
      Ok(response) if response.is_ok() => {
        if let Some(cache) = &cache {
          store(cache, request, &response);
        }
        return Ok(Served::from_network(response));
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "page response not ok, trying cache");
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "page fetch failed, trying cache");
      }
    }

    if let Some(cached) = cache.as_ref().and_then(|c| lookup(c, request)) {
      return Ok(Served::from_cache(cached));
    }

    Ok(Served::fallback(fallback::offline_page(&self.app_name)))
  }

  /// Static assets: cache first, network second, empty CSS/JS as last resort.
  pub async fn cache_first(&self, request: &Request) -> Result<Served> {
    let cache = self.tier(TierKind::Critical);

    if let Some(cached) = cache.as_ref().and_then(|c| lookup(c, request)) {
      return Ok(Served::from_cache(cached));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if let (Some(cache), true) = (cache.as_ref(), response.is_ok()) {
          store(cache, request, &response);
        }
        Ok(Served::from_network(response))
      }
      Err(e) => {
        warn!(url = %request.url, error = %e, "static asset fetch failed");
        let path = request.path();
        if path.contains(".css") {
          Ok(Served::fallback(fallback::empty_stylesheet()))
        } else if path.contains(".js") {
          Ok(Served::fallback(fallback::empty_script()))
        } else {
          Err(e)
        }
      }
    }
  }

  /// Dynamic data: network first; a cached copy is only served while it is young.
  pub async fn network_first_with_ttl(&self, request: &Request) -> Result<Served> {
    let cache = self.tier(TierKind::Dynamic);

    let error = match self.network.fetch(request).await {
      Ok(response) => {
        if let (Some(cache), true) = (cache.as_ref(), response.is_ok()) {
          let stamped = response.clone().with_header(
            CACHED_AT_HEADER,
            &Utc::now().timestamp_millis().to_string(),
          );
          store(cache, request, &stamped);
        }
        return Ok(Served::from_network(response));
      }
      Err(e) => e,
    };

    if let Some(cached) = cache.as_ref().and_then(|c| lookup(c, request)) {
      let now = Utc::now().timestamp_millis();
      if within_ttl(cached.header(CACHED_AT_HEADER), now, self.dynamic_ttl) {
        return Ok(Served::from_cache(cached));
      }
      debug!(url = %request.url, "cached copy expired");
    }

    Err(error)
  }

  fn revalidate_in_background(&self, cache: CacheHandle<S>, request: Request) {
    let network = Arc::clone(&self.network);
    tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) if response.is_ok() => store(&cache, &request, &response),
        Ok(response) => {
          debug!(url = %request.url, status = response.status, "background refresh not ok")
        }
        Err(e) => debug!(url = %request.url, error = %e, "background refresh failed"),
      }
    });
  }

  fn tier(&self, kind: TierKind) -> Option<CacheHandle<S>> {
    match self.registry.open(kind) {
      Ok(cache) => Some(cache),
      Err(e) => {
        warn!(tier = kind.purpose(), error = %e, "cache tier unavailable");
        None
      }
    }
  }
}

fn lookup<S: CacheStorage>(cache: &CacheHandle<S>, request: &Request) -> Option<Response> {
  match cache.match_request(request) {
    Ok(found) => found,
    Err(e) => {
      warn!(cache = %cache.name(), url = %request.url, error = %e, "cache lookup failed");
      None
    }
  }
}

fn store<S: CacheStorage>(cache: &CacheHandle<S>, request: &Request, response: &Response) {
  if let Err(e) = cache.put(request, response) {
    warn!(cache = %cache.name(), url = %request.url, error = %e, "cache write failed");
  }
}
