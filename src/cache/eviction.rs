//! Entry-count bound for the image tier.
//!
//! Enforced at write time only. Keys come back in write order, which stands
//! in for recency: an entry that is read again but never rewritten is not
//! bumped, so this approximates LRU rather than implementing it.

use color_eyre::Result;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::tiers::CacheHandle;
use crate::http::RequestKey;

/// How many entries must go so that one more insert stays within `bound`.
pub fn overflow(count: usize, bound: usize) -> usize {
  if count >= bound {
    (count - bound + 1).min(count)
  } else {
    0
  }
}

/// Remove the oldest entries so the next insert leaves at most `bound` entries.
///
/// Returns the evicted keys. Individual delete failures are logged; the
/// caller still stores its entry.
pub fn make_room<S: CacheStorage>(cache: &CacheHandle<S>, bound: usize) -> Result<Vec<RequestKey>> {
  let keys = cache.keys()?;
  let excess = overflow(keys.len(), bound);
  if excess == 0 {
    return Ok(Vec::new());
  }

  let mut evicted = Vec::with_capacity(excess);
  for key in keys.into_iter().take(excess) {
    match cache.delete(&key) {
      Ok(_) => evicted.push(key),
      Err(e) => warn!(cache = %cache.name(), key = %key, error = %e, "eviction failed"),
    }
  }

  debug!(cache = %cache.name(), evicted = evicted.len(), "evicted oldest entries");
  Ok(evicted)
}
