use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::BoxFuture;

/// Lifetime extension handed to every event handler.
///
/// Work passed to `wait_until` keeps the event open: dispatch does not
/// return before all of it has settled. Failures of extended work are
/// logged and never fail the event.
#[derive(Clone, Default)]
pub struct ExtendableEvent {
  pending: Arc<Mutex<Vec<BoxFuture<Result<()>>>>>,
}

impl ExtendableEvent {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn wait_until<F>(&self, future: F) -> Result<()>
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let mut pending = self
      .pending
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    pending.push(Box::pin(future));
    Ok(())
  }

  pub fn pending(&self) -> usize {
    self.pending.lock().map(|p| p.len()).unwrap_or(0)
  }

  /// Run extended work until none is left. Returns how many futures failed.
  pub async fn settle(&self, event: &str) -> Result<usize> {
    let mut failed = 0;

    loop {
      let batch = {
        let mut pending = self
          .pending
          .lock()
          .map_err(|e| eyre!("Lock poisoned: {}", e))?;
        std::mem::take(&mut *pending)
      };
      if batch.is_empty() {
        break;
      }

      debug!(event, count = batch.len(), "waiting on extended work");
      for outcome in join_all(batch).await {
        if let Err(e) = outcome {
          warn!(event, error = %e, "extended work failed");
          failed += 1;
        }
      }
    }

    Ok(failed)
  }
}
