//! Open page contexts and the messages broadcast to them.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Messages posted to open pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A new version took control
  ServiceWorkerUpdated { version: String },
  /// Cached content was refreshed by a sync round
  ContentUpdated { updates: serde_json::Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
  Window,
  Worker,
}

/// Snapshot of one open page context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
  pub id: String,
  pub url: String,
  pub kind: ClientKind,
  pub focused: bool,
  /// Whether this worker controls the client
  pub controlled: bool,
}

/// Filter for `Clients::match_all`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientQuery {
  pub include_uncontrolled: bool,
  pub kind: Option<ClientKind>,
}

impl ClientQuery {
  /// All windows, controlled or not.
  pub fn all_windows() -> Self {
    Self {
      include_uncontrolled: true,
      kind: Some(ClientKind::Window),
    }
  }
}

/// The platform's view of open pages.
#[async_trait]
pub trait Clients: Send + Sync {
  async fn match_all(&self, query: ClientQuery) -> Result<Vec<ClientInfo>>;

  /// Take control of every open page without a reload.
  async fn claim(&self) -> Result<()>;

  async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()>;

  async fn focus(&self, client_id: &str) -> Result<ClientInfo>;

  async fn open_window(&self, url: &str) -> Result<ClientInfo>;
}

/// Post a message to every controlled client. Returns how many received it.
pub async fn broadcast_message(clients: &dyn Clients, message: &ClientMessage) -> Result<usize> {
  let targets = clients.match_all(ClientQuery::default()).await?;
  let mut delivered = 0;

  for client in &targets {
    match clients.post_message(&client.id, message).await {
      Ok(()) => delivered += 1,
      Err(e) => warn!(client = %client.id, error = %e, "failed to post message"),
    }
  }

  debug!(delivered, total = targets.len(), "broadcast message");
  Ok(delivered)
}

struct ClientRecord {
  info: ClientInfo,
  inbox: Vec<ClientMessage>,
}

#[derive(Default)]
struct LocalState {
  clients: Vec<ClientRecord>,
  next_id: u64,
}

/// In-process client registry.
///
/// Each client keeps an inbox of posted messages; every post is also sent
/// on a broadcast feed that observers can subscribe to.
pub struct LocalClients {
  state: Mutex<LocalState>,
  feed: broadcast::Sender<(String, ClientMessage)>,
}

impl Default for LocalClients {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalClients {
  pub fn new() -> Self {
    let (feed, _) = broadcast::channel(64);
    Self {
      state: Mutex::new(LocalState::default()),
      feed,
    }
  }

  fn with_state<T>(&self, f: impl FnOnce(&mut LocalState) -> Result<T>) -> Result<T> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    f(&mut state)
  }

  /// Register an open page. Returns its id.
  pub fn connect(&self, url: &str, kind: ClientKind, controlled: bool) -> Result<String> {
    self.with_state(|state| Ok(insert(state, url, kind, controlled, false).id))
  }

  pub fn subscribe(&self) -> broadcast::Receiver<(String, ClientMessage)> {
    self.feed.subscribe()
  }

  /// Messages received by a client so far.
  pub fn inbox(&self, client_id: &str) -> Result<Vec<ClientMessage>> {
    self.with_state(|state| {
      state
        .clients
        .iter()
        .find(|c| c.info.id == client_id)
        .map(|c| c.inbox.clone())
        .ok_or_else(|| eyre!("Unknown client {}", client_id))
    })
  }

  pub fn snapshot(&self) -> Result<Vec<ClientInfo>> {
    self.with_state(|state| Ok(state.clients.iter().map(|c| c.info.clone()).collect()))
  }
}

fn insert(
  state: &mut LocalState,
  url: &str,
  kind: ClientKind,
  controlled: bool,
  focused: bool,
) -> ClientInfo {
  state.next_id += 1;
  let info = ClientInfo {
    id: format!("client-{}", state.next_id),
    url: url.to_string(),
    kind,
    focused,
    controlled,
  };
  state.clients.push(ClientRecord {
    info: info.clone(),
    inbox: Vec::new(),
  });
  info
}

#[async_trait]
impl Clients for LocalClients {
  async fn match_all(&self, query: ClientQuery) -> Result<Vec<ClientInfo>> {
    self.with_state(|state| {
      Ok(
        state
          .clients
          .iter()
          .map(|c| &c.info)
          .filter(|info| query.include_uncontrolled || info.controlled)
          .filter(|info| query.kind.map_or(true, |k| info.kind == k))
          .cloned()
          .collect(),
      )
    })
  }

  async fn claim(&self) -> Result<()> {
    self.with_state(|state| {
      for client in &mut state.clients {
        client.info.controlled = true;
      }
      Ok(())
    })
  }

  async fn post_message(&self, client_id: &str, message: &ClientMessage) -> Result<()> {
    self.with_state(|state| {
      let client = state
        .clients
        .iter_mut()
        .find(|c| c.info.id == client_id)
        .ok_or_else(|| eyre!("Unknown client {}", client_id))?;
      client.inbox.push(message.clone());
      Ok(())
    })?;

    // No subscribers is fine
    let _ = self.feed.send((client_id.to_string(), message.clone()));
    Ok(())
  }

  async fn focus(&self, client_id: &str) -> Result<ClientInfo> {
    self.with_state(|state| {
      if !state.clients.iter().any(|c| c.info.id == client_id) {
        return Err(eyre!("Unknown client {}", client_id));
      }
      let mut focused = None;
      for client in &mut state.clients {
        client.info.focused = client.info.id == client_id;
        if client.info.focused {
          focused = Some(client.info.clone());
        }
      }
      focused.ok_or_else(|| eyre!("Unknown client {}", client_id))
    })
  }

  async fn open_window(&self, url: &str) -> Result<ClientInfo> {
    self.with_state(|state| {
      for client in &mut state.clients {
        client.info.focused = false;
      }
      Ok(insert(state, url, ClientKind::Window, true, true))
    })
  }
}
