//! The worker: a table of event handlers over the shared components.

mod event;
mod extendable;

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::cache::{CacheStorage, TierRegistry};
use crate::clients::Clients;
use crate::config::Config;
use crate::fetch::{classify, Route, StrategyExecutor};
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager};
use crate::network::Network;
use crate::push::{Notifier, PushDispatcher};
use crate::sync::{BackgroundSync, SyncStore, SyncTag, LEGACY_TAG, PERIODIC_CONTENT_TAG};

pub use event::{EventKind, EventOutcome, FetchOutcome, WorkerEvent};
pub use extendable::ExtendableEvent;

/// A boxed future that can cross tasks
type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An event handler. Receives the shared components, the event and its
/// lifetime extension.
type Handler<S> =
  Box<dyn Fn(Arc<Components<S>>, WorkerEvent, ExtendableEvent) -> BoxFuture<Result<EventOutcome>> + Send + Sync>;

/// Platform services the worker talks to.
pub struct Platform {
  pub network: Arc<dyn Network>,
  pub clients: Arc<dyn Clients>,
  pub notifier: Arc<dyn Notifier>,
  pub sync_store: Arc<dyn SyncStore>,
}

struct Components<S: CacheStorage> {
  origin: Url,
  registry: Arc<TierRegistry<S>>,
  lifecycle: LifecycleManager<S>,
  strategies: StrategyExecutor<S>,
  sync: BackgroundSync<S>,
  push: PushDispatcher,
}

/// Install and activate outcomes of a fresh start.
#[derive(Debug, Clone)]
pub struct StartReport {
  pub install: InstallReport,
  pub activate: Option<ActivateReport>,
}

pub struct ServiceWorker<S: CacheStorage + 'static> {
  components: Arc<Components<S>>,
  handlers: HashMap<EventKind, Handler<S>>,
}

impl<S: CacheStorage + 'static> ServiceWorker<S> {
  pub fn new(config: &Config, storage: Arc<S>, platform: Platform) -> Result<Self> {
    let origin = config.origin_url()?;
    let registry = Arc::new(TierRegistry::new(
      storage,
      &config.cache_prefix,
      &config.version,
      config.image_cache_limit,
    ));

    let lifecycle = LifecycleManager::new(
      Arc::clone(&registry),
      Arc::clone(&platform.network),
      Arc::clone(&platform.clients),
      origin.clone(),
      config.critical_assets.clone(),
    );
    let strategies = StrategyExecutor::new(
      Arc::clone(&registry),
      Arc::clone(&platform.network),
      config.dynamic_ttl(),
      &config.app_name,
    );
    let sync = BackgroundSync::new(
      platform.sync_store,
      Arc::clone(&platform.network),
      Arc::clone(&platform.clients),
      Arc::clone(&registry),
      origin.clone(),
      &config.endpoints.analytics,
      &config.endpoints.content_updates,
    )?;
    let push = PushDispatcher::new(
      platform.notifier,
      platform.clients,
      config.push.clone(),
      config.routes.clone(),
      origin.clone(),
    );

    let mut worker = Self {
      components: Arc::new(Components {
        origin,
        registry,
        lifecycle,
        strategies,
        sync,
        push,
      }),
      handlers: HashMap::new(),
    };

    worker.on(EventKind::Install, Box::new(on_install::<S>));
    worker.on(EventKind::Activate, Box::new(on_activate::<S>));
    worker.on(EventKind::Fetch, Box::new(on_fetch::<S>));
    worker.on(EventKind::Sync, Box::new(on_sync::<S>));
    worker.on(EventKind::PeriodicSync, Box::new(on_periodic_sync::<S>));
    worker.on(EventKind::Push, Box::new(on_push::<S>));
    worker.on(EventKind::NotificationClick, Box::new(on_notification_click::<S>));

    Ok(worker)
  }

  fn on(&mut self, kind: EventKind, handler: Handler<S>) {
    self.handlers.insert(kind, handler);
  }

  pub fn registry(&self) -> &Arc<TierRegistry<S>> {
    &self.components.registry
  }

  pub fn sync_store(&self) -> &Arc<dyn SyncStore> {
    self.components.sync.store()
  }

  pub fn origin(&self) -> &Url {
    &self.components.origin
  }

  /// Run the handler for an event and wait for all work it extended.
  pub async fn dispatch(&self, event: WorkerEvent) -> Result<EventOutcome> {
    let kind = event.kind();
    let handler = self
      .handlers
      .get(&kind)
      .ok_or_else(|| eyre!("No handler for {} events", kind.as_str()))?;

    debug!(event = kind.as_str(), "dispatching");
    let extendable = ExtendableEvent::new();
    let outcome = handler(Arc::clone(&self.components), event, extendable.clone()).await;
    extendable.settle(kind.as_str()).await?;
    outcome
  }

  /// Install, then activate right away when install asks to skip waiting.
  pub async fn start(&self) -> Result<StartReport> {
    let install = match self.dispatch(WorkerEvent::Install).await? {
      EventOutcome::Installed(report) => report,
      other => return Err(eyre!("Unexpected install outcome: {:?}", other)),
    };

    if !install.skip_waiting {
      return Ok(StartReport {
        install,
        activate: None,
      });
    }

    let activate = match self.dispatch(WorkerEvent::Activate).await? {
      EventOutcome::Activated(report) => report,
      other => return Err(eyre!("Unexpected activate outcome: {:?}", other)),
    };

    Ok(StartReport {
      install,
      activate: Some(activate),
    })
  }
}

fn on_install<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  _event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let report = components.lifecycle.install().await?;
    Ok(EventOutcome::Installed(report))
  })
}

fn on_activate<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  _event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let report = components.lifecycle.activate().await?;
    Ok(EventOutcome::Activated(report))
  })
}

fn on_fetch<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let WorkerEvent::Fetch(request) = event else {
      return Err(eyre!("Fetch handler got {:?}", kind));
    };

    let route = classify(&request, &components.origin);
    debug!(url = %request.url, route = ?route, "classified request");
    if route == Route::PassThrough {
      return Ok(EventOutcome::Fetch(FetchOutcome::PassThrough));
    }

    let served = components.strategies.execute(route, &request).await?;
    Ok(EventOutcome::Fetch(FetchOutcome::Served(served)))
  })
}

fn on_sync<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let WorkerEvent::Sync { tag } = event else {
      return Err(eyre!("Sync handler got {:?}", kind));
    };

    match SyncTag::from_registration(&tag) {
      Some(sync_tag) => {
        let report = components.sync.drain(sync_tag).await?;
        Ok(EventOutcome::Synced(Some(report)))
      }
      None if tag == LEGACY_TAG => {
        info!(tag = %tag, "generic background sync fired");
        Ok(EventOutcome::Synced(None))
      }
      None => {
        debug!(tag = %tag, "ignoring unknown sync tag");
        Ok(EventOutcome::Synced(None))
      }
    }
  })
}

fn on_periodic_sync<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let WorkerEvent::PeriodicSync { tag } = event else {
      return Err(eyre!("Periodic sync handler got {:?}", kind));
    };

    if tag != PERIODIC_CONTENT_TAG {
      debug!(tag = %tag, "ignoring unknown periodic sync tag");
      return Ok(EventOutcome::Synced(None));
    }

    let report = components.sync.drain(SyncTag::ContentUpdates).await?;
    Ok(EventOutcome::Synced(Some(report)))
  })
}

fn on_push<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  event: WorkerEvent,
  extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let WorkerEvent::Push { data } = event else {
      return Err(eyre!("Push handler got {:?}", kind));
    };

    let notification = components.push.notification_for(data.as_deref());
    let shown = notification.clone();
    let display = Arc::clone(&components);
    extendable.wait_until(async move { display.push.show(&shown).await })?;

    Ok(EventOutcome::Pushed(notification))
  })
}

fn on_notification_click<S: CacheStorage + 'static>(
  components: Arc<Components<S>>,
  event: WorkerEvent,
  _extendable: ExtendableEvent,
) -> BoxFuture<Result<EventOutcome>> {
  Box::pin(async move {
    let kind = event.kind();
    let WorkerEvent::NotificationClick { action, tag } = event else {
      return Err(eyre!("Click handler got {:?}", kind));
    };

    let outcome = components
      .push
      .click(action.as_deref(), tag.as_deref())
      .await?;
    Ok(EventOutcome::Clicked(outcome))
  })
}
