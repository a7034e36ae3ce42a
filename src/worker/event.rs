use crate::fetch::Served;
use crate::http::Request;
use crate::lifecycle::{ActivateReport, InstallReport};
use crate::push::{ClickOutcome, Notification};
use crate::sync::DrainReport;

/// Events the platform delivers to the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  Install,
  Activate,
  Fetch(Request),
  /// One-off background sync, carrying the registration tag
  Sync { tag: String },
  PeriodicSync { tag: String },
  Push { data: Option<Vec<u8>> },
  NotificationClick {
    action: Option<String>,
    tag: Option<String>,
  },
}

impl WorkerEvent {
  pub fn kind(&self) -> EventKind {
    match self {
      WorkerEvent::Install => EventKind::Install,
      WorkerEvent::Activate => EventKind::Activate,
      WorkerEvent::Fetch(_) => EventKind::Fetch,
      WorkerEvent::Sync { .. } => EventKind::Sync,
      WorkerEvent::PeriodicSync { .. } => EventKind::PeriodicSync,
      WorkerEvent::Push { .. } => EventKind::Push,
      WorkerEvent::NotificationClick { .. } => EventKind::NotificationClick,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
  Sync,
  PeriodicSync,
  Push,
  NotificationClick,
}

impl EventKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventKind::Install => "install",
      EventKind::Activate => "activate",
      EventKind::Fetch => "fetch",
      EventKind::Sync => "sync",
      EventKind::PeriodicSync => "periodicsync",
      EventKind::Push => "push",
      EventKind::NotificationClick => "notificationclick",
    }
  }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
  /// Not ours to handle; the request goes to the network untouched
  PassThrough,
  Served(Served),
}

/// What a handled event produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetch(FetchOutcome),
  /// `None` when the tag had nothing to drain
  Synced(Option<DrainReport>),
  Pushed(Notification),
  Clicked(ClickOutcome),
}
