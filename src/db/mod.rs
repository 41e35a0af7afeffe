//! Persistent store for posts and users.
//!
//! A single SQLite connection guarded by a mutex serializes all writers;
//! every operation is validated up front and raced against its budget (see
//! [`guard`]).

mod error;
mod guard;
mod models;
mod posts;
pub mod schema;
mod users;

pub use error::StoreError;
pub use guard::{Operation, Timeouts};
pub use models::{image_data_url, Collection, Geo, Post, Record, User, MAX_CAPTION_CHARS};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use error::insert_error;

/// Everything needed to open a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
  pub path: PathBuf,
  pub schema_version: u32,
  pub timeouts: Timeouts,
}

impl StoreConfig {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      schema_version: schema::LATEST_VERSION,
      timeouts: Timeouts::default(),
    }
  }
}

/// Handle to the store. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Store {
  conn: Arc<Mutex<Connection>>,
  timeouts: Timeouts,
}

impl Store {
  /// Open (creating if needed) the store and bring its schema up to date.
  pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
    let StoreConfig {
      path,
      schema_version,
      timeouts,
    } = config;
    let budget = timeouts.budget(Operation::Open);
    let location = path.display().to_string();

    let task = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
      if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
          std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Unavailable(format!("failed to create store directory: {}", e))
          })?;
        }
      }

      let mut conn = Connection::open(&path).map_err(|e| {
        StoreError::Unavailable(format!("failed to open store at {}: {}", path.display(), e))
      })?;
      conn.busy_timeout(budget)?;
      schema::upgrade(&mut conn, schema_version)?;
      Ok(conn)
    });

    // An open that cannot finish in time means the store is unusable, not busy.
    let conn = match guard::race(Operation::Open, budget, task).await {
      Err(StoreError::Timeout { budget, .. }) => {
        return Err(StoreError::Unavailable(format!(
          "opening {} timed out after {:?}",
          location, budget
        )));
      }
      other => other?,
    };
    info!(path = %location, schema_version, "opened store");

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
      timeouts,
    })
  }

  /// Insert a new record. Fails with `DuplicateKey` if the key is taken.
  pub async fn add<R: Record>(&self, record: R) -> Result<(), StoreError> {
    record.validate()?;
    let data = encode(&record)?;

    self
      .run(Operation::Write, move |conn| {
        write_row(conn, &record, &data, false).map_err(|e| insert_error(e, record.key()))?;
        debug!(collection = R::COLLECTION.table(), key = record.key(), "added record");
        Ok(())
      })
      .await
  }

  /// Insert or fully replace a record by key.
  pub async fn put<R: Record>(&self, record: R) -> Result<(), StoreError> {
    record.validate()?;
    let data = encode(&record)?;

    self
      .run(Operation::Write, move |conn| {
        let tx = conn.transaction()?;
        if let Some(existing) = read_row::<R>(&tx, record.key())? {
          record.check_replace(&existing)?;
        }
        write_row(&tx, &record, &data, true)?;
        tx.commit()?;
        Ok(())
      })
      .await
  }

  /// Look a record up by key. A missing key is `Ok(None)`.
  pub async fn get<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
    let key = key.to_string();
    self
      .run(Operation::Read, move |conn| read_row::<R>(conn, &key))
      .await
  }

  /// Remove a record. Deleting a missing key succeeds.
  pub async fn delete<R: Record>(&self, key: &str) -> Result<(), StoreError> {
    if key.is_empty() {
      return Err(StoreError::validation("delete requires a key"));
    }
    let key = key.to_string();

    self
      .run(Operation::Delete, move |conn| {
        let collection = R::COLLECTION;
        let removed = conn.execute(
          &format!(
            "DELETE FROM {} WHERE {} = ?1",
            collection.table(),
            collection.key_column()
          ),
          params![key],
        )?;
        if removed == 0 {
          debug!(collection = collection.table(), key = %key, "delete of missing record");
        }
        Ok(())
      })
      .await
  }

  async fn run<T, F>(&self, operation: Operation, work: F) -> Result<T, StoreError>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
  {
    guard::guarded(&self.conn, operation, self.timeouts.budget(operation), work).await
  }
}

fn encode<R: Record>(record: &R) -> Result<Vec<u8>, StoreError> {
  serde_json::to_vec(record)
    .map_err(|e| StoreError::validation(format!("record cannot be encoded: {}", e)))
}

fn read_row<R: Record>(conn: &Connection, key: &str) -> Result<Option<R>, StoreError> {
  let collection = R::COLLECTION;
  let data: Option<Vec<u8>> = conn
    .query_row(
      &format!(
        "SELECT data FROM {} WHERE {} = ?1",
        collection.table(),
        collection.key_column()
      ),
      params![key],
      |row| row.get(0),
    )
    .optional()?;

  match data {
    Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    None => Ok(None),
  }
}

fn write_row<R: Record>(
  conn: &Connection,
  record: &R,
  data: &[u8],
  replace: bool,
) -> rusqlite::Result<usize> {
  let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
  match R::COLLECTION {
    Collection::Posts => conn.execute(
      &format!("{} INTO posts (id, ts, data) VALUES (?1, ?2, ?3)", verb),
      params![record.key(), record.sort_key(), data],
    ),
    Collection::Users => conn.execute(
      &format!("{} INTO users (username, data) VALUES (?1, ?2)", verb),
      params![record.key(), data],
    ),
  }
}
