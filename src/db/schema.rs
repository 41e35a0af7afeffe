//! Record schema and its additive upgrade path.
//!
//! The on-disk version lives in SQLite's `user_version`. Opening with a newer
//! configured version applies every missing step in order; steps only ever
//! create collections and indexes.

use rusqlite::Connection;
use tracing::info;

use super::error::StoreError;

/// Newest schema this build knows how to create.
pub const LATEST_VERSION: u32 = 2;

const STEPS: &[(u32, &str)] = &[
  (
    1,
    r#"
CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    ts INTEGER NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_ts ON posts(ts);
"#,
  ),
  (
    2,
    r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    data BLOB NOT NULL
);
"#,
  ),
];

/// Read the schema version stored in the database.
pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  Ok(version.max(0) as u32)
}

/// Bring the database up to `target`, creating whatever is missing.
pub fn upgrade(conn: &mut Connection, target: u32) -> Result<(), StoreError> {
  if target == 0 || target > LATEST_VERSION {
    return Err(StoreError::Unavailable(format!(
      "schema version {} is not supported (latest is {})",
      target, LATEST_VERSION
    )));
  }

  let current = current_version(conn)?;
  if current > target {
    return Err(StoreError::Unavailable(format!(
      "database schema version {} is newer than requested version {}",
      current, target
    )));
  }
  if current == target {
    return Ok(());
  }

  let tx = conn.transaction()?;
  for (version, sql) in STEPS {
    if *version > current && *version <= target {
      tx.execute_batch(sql)
        .map_err(|e| StoreError::Unavailable(format!("schema step {} failed: {}", version, e)))?;
    }
  }
  // PRAGMA does not accept bound parameters.
  tx.execute_batch(&format!("PRAGMA user_version = {}", target))?;
  tx.commit()?;

  info!(from = current, to = target, "upgraded store schema");
  Ok(())
}
