//! Durable store for deferred work.

use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Mutex;

use super::{SyncPayload, SyncTag, SyncTask};
use crate::cache::SqliteStorage;

/// Where pages park work that could not complete online.
///
/// The page enqueues; the worker only reads pending items and removes the
/// ones it delivered.
pub trait SyncStore: Send + Sync {
  fn enqueue(&self, payload: &SyncPayload) -> Result<i64>;

  /// Pending tasks for a tag, oldest first.
  fn pending(&self, tag: SyncTag) -> Result<Vec<SyncTask>>;

  fn remove(&self, id: i64) -> Result<()>;
}

/// Queue held in memory.
#[derive(Default)]
pub struct MemoryQueue {
  tasks: Mutex<(i64, Vec<SyncTask>)>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SyncStore for MemoryQueue {
  fn enqueue(&self, payload: &SyncPayload) -> Result<i64> {
    let mut guard = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let (next_id, tasks) = &mut *guard;
    *next_id += 1;
    tasks.push(SyncTask {
      id: *next_id,
      tag: payload.tag(),
      payload: payload.clone(),
    });
    Ok(*next_id)
  }

  fn pending(&self, tag: SyncTag) -> Result<Vec<SyncTask>> {
    let guard = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(guard.1.iter().filter(|t| t.tag == tag).cloned().collect())
  }

  fn remove(&self, id: i64) -> Result<()> {
    let mut guard = self
      .tasks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    guard.1.retain(|t| t.id != id);
    Ok(())
  }
}

impl SyncStore for SqliteStorage {
  fn enqueue(&self, payload: &SyncPayload) -> Result<i64> {
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize task: {}", e))?;

    self.with_conn(|conn| {
      conn
        .execute(
          "INSERT INTO sync_queue (tag, payload) VALUES (?, ?)",
          params![payload.tag().as_str(), data],
        )
        .map_err(|e| eyre!("Failed to enqueue task: {}", e))?;
      Ok(conn.last_insert_rowid())
    })
  }

  fn pending(&self, tag: SyncTag) -> Result<Vec<SyncTask>> {
    self.with_conn(|conn| {
      let mut stmt = conn
        .prepare("SELECT id, payload FROM sync_queue WHERE tag = ? ORDER BY id")
        .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

      let rows = stmt
        .query_map(params![tag.as_str()], |row| {
          Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| eyre!("Failed to read queue: {}", e))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| eyre!("Failed to read queued task: {}", e))?;

      let mut tasks = Vec::with_capacity(rows.len());
      for (id, data) in rows {
        match serde_json::from_str::<SyncPayload>(&data) {
          Ok(payload) => tasks.push(SyncTask { id, tag, payload }),
          Err(e) => tracing::warn!(id, error = %e, "skipping unreadable queued task"),
        }
      }
      Ok(tasks)
    })
  }

  fn remove(&self, id: i64) -> Result<()> {
    self.with_conn(|conn| {
      conn
        .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove task {}: {}", id, e))?;
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn form(url: &str) -> SyncPayload {
    SyncPayload::Form {
      url: url.to_string(),
      method: "POST".to_string(),
      headers: Default::default(),
      body: Some("email=a%40b.test".to_string()),
    }
  }

  fn exercise(store: &dyn SyncStore) {
    let a = store.enqueue(&form("/api/newsletter")).unwrap();
    let b = store
      .enqueue(&SyncPayload::Analytics {
        event: serde_json::json!({"event": "view"}),
      })
      .unwrap();
    let c = store.enqueue(&form("/api/contact")).unwrap();

    let forms = store.pending(SyncTag::Forms).unwrap();
    assert_eq!(forms.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a, c]);
    assert_eq!(forms[0].payload, form("/api/newsletter"));

    store.remove(a).unwrap();
    let forms = store.pending(SyncTag::Forms).unwrap();
    assert_eq!(forms.len(), 1);
    assert_eq!(store.pending(SyncTag::Analytics).unwrap()[0].id, b);
    assert!(store.pending(SyncTag::ContentUpdates).unwrap().is_empty());
  }

  #[test]
  fn test_memory_queue() {
    exercise(&MemoryQueue::new());
  }

  #[test]
  fn test_sqlite_queue() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();
    exercise(&storage);
  }
}
