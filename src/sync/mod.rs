//! Background sync: draining deferred work once connectivity returns.
//!
//! Each drain attempts every pending item of one tag. Delivered items are
//! removed; failed ones stay queued for the next trigger. There is no
//! all-or-nothing guarantee across items and no retry backoff of our own.

mod queue;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, TierKind, TierRegistry};
use crate::clients::{broadcast_message, ClientMessage, Clients};
use crate::http::{Headers, Request, Response};
use crate::network::Network;

pub use queue::{MemoryQueue, SyncStore};

/// Periodic sync tag that triggers a content refresh.
pub const PERIODIC_CONTENT_TAG: &str = "daily-content-update";
/// Generic tag from older page builds. Accepted, but nothing is queued under it.
pub const LEGACY_TAG: &str = "background-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTag {
  Forms,
  Analytics,
  ContentUpdates,
}

impl SyncTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncTag::Forms => "forms",
      SyncTag::Analytics => "analytics",
      SyncTag::ContentUpdates => "content-updates",
    }
  }

  /// Tag the page registers with the platform.
  pub fn registration(&self) -> &'static str {
    match self {
      SyncTag::Forms => "background-sync-forms",
      SyncTag::Analytics => "background-sync-analytics",
      SyncTag::ContentUpdates => "background-sync-updates",
    }
  }

  pub fn from_registration(tag: &str) -> Option<Self> {
    match tag {
      "background-sync-forms" => Some(SyncTag::Forms),
      "background-sync-analytics" => Some(SyncTag::Analytics),
      "background-sync-updates" => Some(SyncTag::ContentUpdates),
      _ => None,
    }
  }
}

impl FromStr for SyncTag {
  type Err = color_eyre::Report;

  /// Accepts both the short name and the registration tag.
  fn from_str(s: &str) -> Result<Self> {
    match s {
      "forms" => Ok(SyncTag::Forms),
      "analytics" => Ok(SyncTag::Analytics),
      "content-updates" | "updates" => Ok(SyncTag::ContentUpdates),
      other => SyncTag::from_registration(other).ok_or_else(|| eyre!("Unknown sync tag: {}", other)),
    }
  }
}

/// What a queued task carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncPayload {
  /// A form submission to replay as-is
  Form {
    url: String,
    method: String,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    body: Option<String>,
  },
  /// An analytics event to post
  Analytics { event: serde_json::Value },
  /// Marker asking for a content refresh
  ContentUpdates,
}

impl SyncPayload {
  pub fn tag(&self) -> SyncTag {
    match self {
      SyncPayload::Form { .. } => SyncTag::Forms,
      SyncPayload::Analytics { .. } => SyncTag::Analytics,
      SyncPayload::ContentUpdates => SyncTag::ContentUpdates,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncTask {
  pub id: i64,
  pub tag: SyncTag,
  pub payload: SyncPayload,
}

/// Result of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Items delivered and removed from the queue
  pub delivered: usize,
  /// Items left for the next trigger
  pub retained: usize,
  /// Content updates written into the dynamic tier
  pub applied: usize,
}

/// Drains the sync queue against the network.
pub struct BackgroundSync<S: CacheStorage> {
  store: Arc<dyn SyncStore>,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  registry: Arc<TierRegistry<S>>,
  origin: Url,
  analytics_url: Url,
  content_updates_url: Url,
}

impl<S: CacheStorage> BackgroundSync<S> {
  pub fn new(
    store: Arc<dyn SyncStore>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    registry: Arc<TierRegistry<S>>,
    origin: Url,
    analytics_path: &str,
    content_updates_path: &str,
  ) -> Result<Self> {
    let analytics_url = origin
      .join(analytics_path)
      .map_err(|e| eyre!("Invalid analytics endpoint {}: {}", analytics_path, e))?;
    let content_updates_url = origin
      .join(content_updates_path)
      .map_err(|e| eyre!("Invalid content endpoint {}: {}", content_updates_path, e))?;

    Ok(Self {
      store,
      network,
      clients,
      registry,
      origin,
      analytics_url,
      content_updates_url,
    })
  }

  pub fn store(&self) -> &Arc<dyn SyncStore> {
    &self.store
  }

  pub async fn drain(&self, tag: SyncTag) -> Result<DrainReport> {
    let report = match tag {
      SyncTag::Forms => self.drain_forms().await?,
      SyncTag::Analytics => self.drain_analytics().await?,
      SyncTag::ContentUpdates => self.refresh_content().await?,
    };
    info!(
      tag = tag.as_str(),
      delivered = report.delivered,
      retained = report.retained,
      "background sync finished"
    );
    Ok(report)
  }

  async fn drain_forms(&self) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for task in self.store.pending(SyncTag::Forms)? {
      let SyncPayload::Form {
        url,
        method,
        headers,
        body,
      } = &task.payload
      else {
        continue;
      };

      let request = match self.origin.join(url) {
        Ok(url) => {
          let mut request = Request::new(method, url);
          request.headers = headers.clone();
          request.body = body.as_ref().map(|b| b.clone().into_bytes());
          request
        }
        Err(e) => {
          warn!(id = task.id, url = %url, error = %e, "queued form has an invalid URL");
          report.retained += 1;
          continue;
        }
      };

      self.deliver(&task, &request, &mut report).await;
    }

    Ok(report)
  }

  async fn drain_analytics(&self) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for task in self.store.pending(SyncTag::Analytics)? {
      let SyncPayload::Analytics { event } = &task.payload else {
        continue;
      };

      let body = serde_json::to_vec(event).map_err(|e| eyre!("Failed to encode event: {}", e))?;
      let request = Request::new("POST", self.analytics_url.clone())
        .with_header("content-type", "application/json")
        .with_body(body);

      self.deliver(&task, &request, &mut report).await;
    }

    Ok(report)
  }

  /// Send one item; remove it only after a 2xx answer.
  async fn deliver(&self, task: &SyncTask, request: &Request, report: &mut DrainReport) {
    match self.network.fetch(request).await {
      Ok(response) if response.is_ok() => match self.store.remove(task.id) {
        Ok(()) => {
          debug!(id = task.id, url = %request.url, "queued item delivered");
          report.delivered += 1;
        }
        Err(e) => {
          warn!(id = task.id, error = %e, "delivered item could not be removed");
          report.retained += 1;
        }
      },
      Ok(response) => {
        warn!(id = task.id, status = response.status, "queued item rejected, keeping it");
        report.retained += 1;
      }
      Err(e) => {
        warn!(id = task.id, error = %e, "queued item failed, keeping it");
        report.retained += 1;
      }
    }
  }

  /// Poll for content updates, write price updates into the dynamic tier and
  /// tell open pages.
  async fn refresh_content(&self) -> Result<DrainReport> {
    let markers = self.store.pending(SyncTag::ContentUpdates)?;
    let mut report = DrainReport::default();

    let updates = match self.fetch_updates().await {
      Ok(updates) => updates,
      Err(e) => {
        warn!(error = %e, "content update failed");
        report.retained = markers.len();
        return Ok(report);
      }
    };

    for update in &updates {
      if update.get("type").and_then(|t| t.as_str()) != Some("product-price") {
        continue;
      }
      match self.apply_update(update) {
        Ok(()) => report.applied += 1,
        Err(e) => warn!(error = %e, "failed to apply content update"),
      }
    }

    let message = ClientMessage::ContentUpdated {
      updates: serde_json::Value::Array(updates),
    };
    if let Err(e) = broadcast_message(self.clients.as_ref(), &message).await {
      warn!(error = %e, "failed to notify pages about content updates");
    }

    for marker in markers {
      match self.store.remove(marker.id) {
        Ok(()) => report.delivered += 1,
        Err(e) => {
          warn!(id = marker.id, error = %e, "failed to remove content marker");
          report.retained += 1;
        }
      }
    }

    Ok(report)
  }

  async fn fetch_updates(&self) -> Result<Vec<serde_json::Value>> {
    let response = self
      .network
      .fetch(&Request::get(self.content_updates_url.clone()))
      .await?;

    if !response.is_ok() {
      return Err(eyre!(
        "Content update endpoint answered {}",
        response.status
      ));
    }

    serde_json::from_slice(&response.body)
      .map_err(|e| eyre!("Failed to parse content updates: {}", e))
  }

  fn apply_update(&self, update: &serde_json::Value) -> Result<()> {
    let target = update
      .get("url")
      .and_then(|u| u.as_str())
      .ok_or_else(|| eyre!("Content update without url"))?;
    let url = self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid content update url {}: {}", target, e))?;
    let data = update.get("data").cloned().unwrap_or(serde_json::Value::Null);
    let body = serde_json::to_vec(&data).map_err(|e| eyre!("Failed to encode update: {}", e))?;

    let cache = self.registry.open(TierKind::Dynamic)?;
    cache.put(&Request::get(url), &Response::ok(body, "application/json"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::clients::{ClientKind, LocalClients};
  use crate::testing::FakeNetwork;

  struct Harness {
    store: Arc<MemoryQueue>,
    network: Arc<FakeNetwork>,
    clients: Arc<LocalClients>,
    registry: Arc<TierRegistry<MemoryStorage>>,
    sync: BackgroundSync<MemoryStorage>,
  }

  fn harness() -> Harness {
    let store = Arc::new(MemoryQueue::new());
    let network = Arc::new(FakeNetwork::new());
    let clients = Arc::new(LocalClients::new());
    let registry = Arc::new(TierRegistry::new(
      Arc::new(MemoryStorage::new()),
      "shop",
      "1",
      50,
    ));
    let sync = BackgroundSync::new(
      Arc::clone(&store) as Arc<dyn SyncStore>,
      Arc::clone(&network) as Arc<dyn Network>,
      Arc::clone(&clients) as Arc<dyn Clients>,
      Arc::clone(&registry),
      Url::parse("https://shop.test/").unwrap(),
      "/api/analytics",
      "/api/content-updates",
    )
    .unwrap();
    Harness {
      store,
      network,
      clients,
      registry,
      sync,
    }
  }

  fn form(path: &str) -> SyncPayload {
    SyncPayload::Form {
      url: path.to_string(),
      method: "POST".to_string(),
      headers: Headers::from([(
        "content-type".to_string(),
        "application/x-www-form-urlencoded".to_string(),
      )]),
      body: Some("name=Ada".to_string()),
    }
  }

  #[test]
  fn test_tag_names() {
    for tag in [SyncTag::Forms, SyncTag::Analytics, SyncTag::ContentUpdates] {
      assert_eq!(SyncTag::from_registration(tag.registration()), Some(tag));
      assert_eq!(tag.registration().parse::<SyncTag>().unwrap(), tag);
      assert_eq!(tag.as_str().parse::<SyncTag>().unwrap(), tag);
    }
    assert!("background-sync".parse::<SyncTag>().is_err());
  }

  #[test]
  fn test_payload_wire_format() {
    let json = serde_json::to_value(&form("/api/contact")).unwrap();
    assert_eq!(json["kind"], "form");
    assert_eq!(json["method"], "POST");
    let back: SyncPayload = serde_json::from_value(json).unwrap();
    assert_eq!(back, form("/api/contact"));
  }

  #[tokio::test]
  async fn test_failing_form_stays_queued() {
    let h = harness();
    h.store.enqueue(&form("/api/broken")).unwrap();
    h.store.enqueue(&form("/api/contact")).unwrap();
    h.network.respond("/api/contact", Response::new(200, "thanks"));

    let report = h.sync.drain(SyncTag::Forms).await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.retained, 1);
    let left = h.store.pending(SyncTag::Forms).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload, form("/api/broken"));

    let calls = h.network.calls();
    let sent = &calls[1];
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.body.as_deref(), Some(&b"name=Ada"[..]));
  }

  #[tokio::test]
  async fn test_rejected_form_stays_queued() {
    let h = harness();
    h.store.enqueue(&form("/api/contact")).unwrap();
    h.network.respond("/api/contact", Response::new(500, ""));

    let report = h.sync.drain(SyncTag::Forms).await.unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(h.store.pending(SyncTag::Forms).unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_analytics_posts_json() {
    let h = harness();
    h.store
      .enqueue(&SyncPayload::Analytics {
        event: serde_json::json!({"event": "add_to_cart", "sku": "PP-01"}),
      })
      .unwrap();
    h.network.respond("/api/analytics", Response::new(204, ""));

    let report = h.sync.drain(SyncTag::Analytics).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(h.store.pending(SyncTag::Analytics).unwrap().is_empty());

    let calls = h.network.calls();
    let sent = &calls[0];
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["sku"], "PP-01");
  }

  #[tokio::test]
  async fn test_content_refresh_applies_prices_and_notifies() {
    let h = harness();
    let page = h
      .clients
      .connect("https://shop.test/", ClientKind::Window, true)
      .unwrap();
    h.store.enqueue(&SyncPayload::ContentUpdates).unwrap();
    h.network.respond(
      "/api/content-updates",
      Response::ok(
        r#"[{"type":"product-price","url":"/api/price/pp-01","data":{"price":49}},
            {"type":"banner","url":"/api/banner","data":{}}]"#,
        "application/json",
      ),
    );

    let report = h.sync.drain(SyncTag::ContentUpdates).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(report.delivered, 1);
    assert!(h.store.pending(SyncTag::ContentUpdates).unwrap().is_empty());

    let cache = h.registry.open(TierKind::Dynamic).unwrap();
    let price_url = Url::parse("https://shop.test/api/price/pp-01").unwrap();
    let cached = cache.match_request(&Request::get(price_url)).unwrap().unwrap();
    assert_eq!(cached.text(), r#"{"price":49}"#);
    assert_eq!(cache.keys().unwrap().len(), 1);

    let inbox = h.clients.inbox(&page).unwrap();
    match &inbox[..] {
      [ClientMessage::ContentUpdated { updates }] => {
        assert_eq!(updates.as_array().unwrap().len(), 2)
      }
      other => panic!("unexpected messages {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_content_refresh_failure_keeps_markers() {
    let h = harness();
    let page = h
      .clients
      .connect("https://shop.test/", ClientKind::Window, true)
      .unwrap();
    h.store.enqueue(&SyncPayload::ContentUpdates).unwrap();

    let report = h.sync.drain(SyncTag::ContentUpdates).await.unwrap();
    assert_eq!(report.retained, 1);
    assert_eq!(h.store.pending(SyncTag::ContentUpdates).unwrap().len(), 1);
    assert!(h.clients.inbox(&page).unwrap().is_empty());
  }
}
