//! Error kinds surfaced by the persistent store.

use std::time::Duration;

use super::guard::Operation;

/// Every failure a store operation can report to its caller.
///
/// A missing record is never an error for reads: `get` returns `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// The record is malformed. Retrying without fixing the input will fail again.
  #[error("invalid record: {0}")]
  Validation(String),

  /// `add` was used for a key that already exists; use `put` to replace.
  #[error("a record with key '{0}' already exists")]
  DuplicateKey(String),

  /// The record an update targets does not exist (e.g. liking a deleted post).
  #[error("no record with key '{0}'")]
  NotFound(String),

  /// The operation lost the race against its deadline.
  #[error("{operation} did not complete within {budget:?}")]
  Timeout {
    operation: Operation,
    budget: Duration,
  },

  /// Storage is denied, missing or broken.
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

impl StoreError {
  /// Whether the same call may succeed if simply tried again.
  pub fn is_retryable(&self) -> bool {
    matches!(self, StoreError::Timeout { .. })
  }

  pub(crate) fn validation(msg: impl Into<String>) -> Self {
    StoreError::Validation(msg.into())
  }
}

impl From<rusqlite::Error> for StoreError {
  fn from(e: rusqlite::Error) -> Self {
    StoreError::Unavailable(e.to_string())
  }
}

impl From<serde_json::Error> for StoreError {
  fn from(e: serde_json::Error) -> Self {
    StoreError::Unavailable(format!("corrupt record: {}", e))
  }
}

/// Map an insert failure, turning primary key conflicts into `DuplicateKey`.
pub(crate) fn insert_error(e: rusqlite::Error, key: &str) -> StoreError {
  match e {
    rusqlite::Error::SqliteFailure(ref err, _)
      if err.code == rusqlite::ErrorCode::ConstraintViolation =>
    {
      StoreError::DuplicateKey(key.to_string())
    }
    other => other.into(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_timeouts_are_retryable() {
    let timeout = StoreError::Timeout {
      operation: Operation::Write,
      budget: Duration::from_secs(7),
    };
    assert!(timeout.is_retryable());
    assert!(!StoreError::DuplicateKey("p_1".into()).is_retryable());
    assert!(!StoreError::validation("missing id").is_retryable());
    assert!(!StoreError::Unavailable("denied".into()).is_retryable());
  }

  #[test]
  fn test_timeout_message_names_operation() {
    let err = StoreError::Timeout {
      operation: Operation::Scan,
      budget: Duration::from_millis(7000),
    };
    assert_eq!(err.to_string(), "scan did not complete within 7s");
  }
}
