//! Install and activation of a worker version.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, TierKind, TierRegistry};
use crate::clients::{broadcast_message, ClientMessage, Clients};
use crate::http::Request;
use crate::network::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Script loaded, nothing attempted yet
  Parsed,
  Installing,
  Installed,
  Activating,
  Active,
}

/// Outcome of pre-warming the critical tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
  /// Activate right away instead of waiting for old pages to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
  pub deleted: Vec<String>,
  pub claimed: bool,
  pub notified: usize,
}

pub struct LifecycleManager<S: CacheStorage> {
  registry: Arc<TierRegistry<S>>,
  network: Arc<dyn Network>,
  clients: Arc<dyn Clients>,
  origin: Url,
  critical_assets: Vec<String>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage> LifecycleManager<S> {
  pub fn new(
    registry: Arc<TierRegistry<S>>,
    network: Arc<dyn Network>,
    clients: Arc<dyn Clients>,
    origin: Url,
    critical_assets: Vec<String>,
  ) -> Self {
    Self {
      registry,
      network,
      clients,
      origin,
      critical_assets,
      state: Mutex::new(LifecycleState::Parsed),
    }
  }

  pub fn state(&self) -> Result<LifecycleState> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(*state)
  }

  fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    if !from.contains(&*state) {
      return Err(eyre!("Cannot move from {:?} to {:?}", *state, to));
    }
    debug!(from = ?*state, to = ?to, "lifecycle transition");
    *state = to;
    Ok(())
  }

  /// Pre-warm the critical tier. Every asset is attempted independently and
  /// install succeeds once all attempts settle, whatever they returned.
  pub async fn install(&self) -> Result<InstallReport> {
    self.transition(&[LifecycleState::Parsed], LifecycleState::Installing)?;

    let attempts = self
      .critical_assets
      .iter()
      .map(|asset| async move { (asset.clone(), self.precache(asset).await) });
    let outcomes = join_all(attempts).await;

    let mut report = InstallReport {
      skip_waiting: true,
      ..Default::default()
    };
    for (asset, outcome) in outcomes {
      match outcome {
        Ok(()) => report.cached.push(asset),
        Err(e) => {
          warn!(asset = %asset, error = %e, "failed to pre-cache asset");
          report.failed.push(asset);
        }
      }
    }

    self.transition(&[LifecycleState::Installing], LifecycleState::Installed)?;
    info!(
      version = self.registry.version(),
      cached = report.cached.len(),
      failed = report.failed.len(),
      "installed"
    );
    Ok(report)
  }

  async fn precache(&self, asset: &str) -> Result<()> {
    let url = self
      .origin
      .join(asset)
      .map_err(|e| eyre!("Invalid asset path {}: {}", asset, e))?;
    let request = Request::get(url);
    let response = self.network.fetch(&request).await?;
    if !response.is_ok() {
      return Err(eyre!("{} answered {}", request.url, response.status));
    }
    self.registry.open(TierKind::Critical)?.put(&request, &response)
  }

  /// Sweep caches of other versions, take control of open pages and tell
  /// them about the new version.
  pub async fn activate(&self) -> Result<ActivateReport> {
    self.transition(&[LifecycleState::Installed], LifecycleState::Activating)?;
    let mut report = ActivateReport::default();

    match self.registry.delete_stale() {
      Ok(deleted) => report.deleted = deleted,
      Err(e) => warn!(error = %e, "failed to sweep old caches"),
    }

    match self.clients.claim().await {
      Ok(()) => report.claimed = true,
      Err(e) => warn!(error = %e, "failed to claim clients"),
    }

    let message = ClientMessage::ServiceWorkerUpdated {
      version: self.registry.version().to_string(),
    };
    match broadcast_message(self.clients.as_ref(), &message).await {
      Ok(count) => report.notified = count,
      Err(e) => warn!(error = %e, "failed to announce new version"),
    }

    self.transition(&[LifecycleState::Activating], LifecycleState::Active)?;
    info!(
      version = self.registry.version(),
      deleted = report.deleted.len(),
      notified = report.notified,
      "activated"
    );
    Ok(report)
  }
}
