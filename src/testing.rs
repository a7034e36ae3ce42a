//! Test doubles shared by unit tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::http::{Request, Response};
use crate::network::Network;

enum Scripted {
  Respond(Response),
  Fail(String),
}

/// Network that answers from a script keyed by URL path.
/// Unscripted paths fail as if the host were unreachable.
#[derive(Default)]
pub(crate) struct FakeNetwork {
  script: Mutex<HashMap<String, Scripted>>,
  calls: Mutex<Vec<Request>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, path: &str, response: Response) -> &Self {
    self
      .script
      .lock()
      .unwrap()
      .insert(path.to_string(), Scripted::Respond(response));
    self
  }

  pub fn fail(&self, path: &str, reason: &str) -> &Self {
    self
      .script
      .lock()
      .unwrap()
      .insert(path.to_string(), Scripted::Fail(reason.to_string()));
    self
  }

  pub fn calls(&self) -> Vec<Request> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.url.path() == path)
      .count()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.lock().unwrap().push(request.clone());

    match self.script.lock().unwrap().get(request.url.path()) {
      Some(Scripted::Respond(response)) => Ok(response.clone()),
      Some(Scripted::Fail(reason)) => Err(eyre!("Failed to fetch {}: {}", request.url, reason)),
      None => Err(eyre!("Failed to fetch {}: network unreachable", request.url)),
    }
  }
}
