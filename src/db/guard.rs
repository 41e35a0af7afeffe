//! Timeout guard for store operations.
//!
//! Each operation runs on the blocking pool while the caller races it against
//! a deadline. Whichever settles first wins. When the deadline wins, the
//! blocking task is detached rather than aborted: its transaction still
//! commits or rolls back on its own, and its result is dropped.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;
use tracing::warn;

use super::error::StoreError;

/// Operation classes, each with its own budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  Open,
  Read,
  Write,
  Delete,
  Scan,
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Operation::Open => "open",
      Operation::Read => "read",
      Operation::Write => "write",
      Operation::Delete => "delete",
      Operation::Scan => "scan",
    };
    f.write_str(name)
  }
}

/// Per-class deadlines, in milliseconds in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
  pub open_ms: u64,
  pub read_ms: u64,
  pub write_ms: u64,
  pub delete_ms: u64,
  pub scan_ms: u64,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      open_ms: 7000,
      read_ms: 5000,
      write_ms: 7000,
      delete_ms: 5000,
      scan_ms: 7000,
    }
  }
}

impl Timeouts {
  pub fn budget(&self, operation: Operation) -> Duration {
    let ms = match operation {
      Operation::Open => self.open_ms,
      Operation::Read => self.read_ms,
      Operation::Write => self.write_ms,
      Operation::Delete => self.delete_ms,
      Operation::Scan => self.scan_ms,
    };
    Duration::from_millis(ms)
  }
}

/// Race `work` against `budget`. The closure gets exclusive use of the
/// connection for its whole run.
pub(crate) async fn guarded<T, F>(
  conn: &Arc<Mutex<Connection>>,
  operation: Operation,
  budget: Duration,
  work: F,
) -> Result<T, StoreError>
where
  T: Send + 'static,
  F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
{
  let conn = Arc::clone(conn);
  let task = tokio::task::spawn_blocking(move || {
    let mut conn = conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {}", e)))?;
    work(&mut conn)
  });

  race(operation, budget, task).await
}

/// First settled wins. Dropping the losing join handle detaches the task.
pub(crate) async fn race<T>(
  operation: Operation,
  budget: Duration,
  task: tokio::task::JoinHandle<Result<T, StoreError>>,
) -> Result<T, StoreError> {
  match tokio::time::timeout(budget, task).await {
    Ok(Ok(result)) => result,
    Ok(Err(join_err)) => Err(StoreError::Unavailable(format!(
      "{} task failed: {}",
      operation, join_err
    ))),
    Err(_) => {
      warn!(%operation, ?budget, "store operation timed out; discarding its result");
      Err(StoreError::Timeout { operation, budget })
    }
  }
}
