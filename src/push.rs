//! Push notifications: payload merging, display and click routing.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientInfo, ClientQuery, Clients};
use crate::config::RoutesConfig;

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// A notification as displayed. Also the template push payloads are merged over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationTemplate {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// De-duplication key for the platform notification center
  pub tag: String,
  pub require_interaction: bool,
  pub actions: Vec<NotificationAction>,
}

pub type Notification = NotificationTemplate;

impl Default for NotificationTemplate {
  fn default() -> Self {
    let action_icon = "/images/icons/icon-96x96.png".to_string();
    Self {
      title: "Storefront".to_string(),
      body: "New updates available!".to_string(),
      icon: "/images/icons/icon-192x192.png".to_string(),
      badge: "/images/icons/icon-72x72.png".to_string(),
      tag: "storefront-notification".to_string(),
      require_interaction: false,
      actions: vec![
        NotificationAction {
          action: "shop".to_string(),
          title: "Shop Now".to_string(),
          icon: Some(action_icon.clone()),
        },
        NotificationAction {
          action: "view".to_string(),
          title: "View Details".to_string(),
          icon: Some(action_icon),
        },
      ],
    }
  }
}

/// Build the notification for a push.
///
/// A JSON object payload overrides template fields one by one; a field of the
/// wrong type is skipped and the template value kept. A JSON string becomes
/// the body. Payloads that are not JSON at all are taken as plain text for
/// the body. An empty payload keeps the template.
pub fn build_notification(data: Option<&[u8]>, template: &Notification) -> Notification {
  let mut notification = template.clone();
  let Some(data) = data else {
    return notification;
  };

  match serde_json::from_slice::<Value>(data) {
    Ok(Value::Object(fields)) => merge_fields(&mut notification, fields),
    Ok(Value::String(text)) => set_body(&mut notification, &text),
    Ok(Value::Number(n)) => set_body(&mut notification, &n.to_string()),
    Ok(Value::Bool(b)) => set_body(&mut notification, &b.to_string()),
    Ok(other) => debug!(payload = %other, "push payload has no usable content"),
    Err(e) => {
      debug!(error = %e, "push payload is not JSON, using it as text");
      set_body(&mut notification, &String::from_utf8_lossy(data));
    }
  }

  notification
}

fn set_body(notification: &mut Notification, text: &str) {
  let text = text.trim();
  if !text.is_empty() {
    notification.body = text.to_string();
  }
}

/// Take one payload field if it has the expected type.
fn field<T: DeserializeOwned>(name: &str, value: Value) -> Option<T> {
  match serde_json::from_value(value) {
    Ok(parsed) => Some(parsed),
    Err(e) => {
      warn!(field = name, error = %e, "ignoring push payload field");
      None
    }
  }
}

fn merge_fields(notification: &mut Notification, fields: Map<String, Value>) {
  for (name, value) in fields {
    match name.as_str() {
      "title" => {
        if let Some(title) = field(&name, value) {
          notification.title = title;
        }
      }
      "body" => {
        if let Some(body) = field(&name, value) {
          notification.body = body;
        }
      }
      "icon" => {
        if let Some(icon) = field(&name, value) {
          notification.icon = icon;
        }
      }
      "badge" => {
        if let Some(badge) = field(&name, value) {
          notification.badge = badge;
        }
      }
      "tag" => {
        if let Some(tag) = field(&name, value) {
          notification.tag = tag;
        }
      }
      "requireInteraction" => {
        if let Some(require_interaction) = field(&name, value) {
          notification.require_interaction = require_interaction;
        }
      }
      "actions" => {
        if let Some(actions) = merge_actions(value) {
          notification.actions = actions;
        }
      }
      _ => debug!(field = %name, "unknown push payload field"),
    }
  }
}

/// Valid entries of an action list. Invalid entries are dropped; a list with
/// no valid entry leaves the template actions in place.
fn merge_actions(value: Value) -> Option<Vec<NotificationAction>> {
  let Value::Array(entries) = value else {
    warn!("ignoring push payload actions that are not a list");
    return None;
  };
  if entries.is_empty() {
    return Some(Vec::new());
  }

  let actions: Vec<NotificationAction> = entries
    .into_iter()
    .filter_map(|entry| field("actions", entry))
    .collect();
  (!actions.is_empty()).then_some(actions)
}

/// The platform notification center.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn show(&self, notification: &Notification) -> Result<()>;

  async fn close(&self, tag: &str) -> Result<()>;
}

/// Notifier that keeps displayed notifications in memory and logs them.
#[derive(Default)]
pub struct LocalNotifier {
  displayed: Mutex<Vec<Notification>>,
}

impl LocalNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn displayed(&self) -> Result<Vec<Notification>> {
    let displayed = self
      .displayed
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(displayed.clone())
  }
}

#[async_trait]
impl Notifier for LocalNotifier {
  async fn show(&self, notification: &Notification) -> Result<()> {
    let mut displayed = self
      .displayed
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    // Same tag replaces the earlier notification
    displayed.retain(|n| n.tag != notification.tag);
    displayed.push(notification.clone());
    info!(title = %notification.title, body = %notification.body, tag = %notification.tag, "notification shown");
    Ok(())
  }

  async fn close(&self, tag: &str) -> Result<()> {
    let mut displayed = self
      .displayed
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    displayed.retain(|n| n.tag != tag);
    Ok(())
  }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An open window already showed the target and was focused
  Focused(ClientInfo),
  /// A new window was opened at the target
  Opened(ClientInfo),
}

/// Turns pushes into notifications and clicks into navigation.
pub struct PushDispatcher {
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn Clients>,
  template: Notification,
  routes: RoutesConfig,
  origin: Url,
}

impl PushDispatcher {
  pub fn new(
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
    template: Notification,
    routes: RoutesConfig,
    origin: Url,
  ) -> Self {
    Self {
      notifier,
      clients,
      template,
      routes,
      origin,
    }
  }

  pub fn notification_for(&self, data: Option<&[u8]>) -> Notification {
    build_notification(data, &self.template)
  }

  /// Display a notification for a push.
  pub async fn show(&self, notification: &Notification) -> Result<()> {
    self.notifier.show(notification).await
  }

  /// Absolute destination for a clicked action.
  pub fn target_for(&self, action: Option<&str>) -> Result<Url> {
    let target = self.routes.target_for(action);
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid route {}: {}", target, e))
  }

  /// Close the clicked notification, then focus a window already at the
  /// target or open a new one there.
  pub async fn click(&self, action: Option<&str>, tag: Option<&str>) -> Result<ClickOutcome> {
    let tag = tag.unwrap_or(self.template.tag.as_str());
    if let Err(e) = self.notifier.close(tag).await {
      warn!(tag, error = %e, "failed to close notification");
    }

    let target = self.target_for(action)?;
    let windows = self.clients.match_all(ClientQuery::all_windows()).await?;

    if let Some(window) = windows.iter().find(|w| same_url(&w.url, &target)) {
      debug!(client = %window.id, target = %target, "focusing existing window");
      let focused = self.clients.focus(&window.id).await?;
      return Ok(ClickOutcome::Focused(focused));
    }

    debug!(target = %target, "opening new window");
    let opened = self.clients.open_window(target.as_str()).await?;
    Ok(ClickOutcome::Opened(opened))
  }
}

fn same_url(candidate: &str, target: &Url) -> bool {
  Url::parse(candidate).is_ok_and(|url| &url == target)
}
