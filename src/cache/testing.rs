//! Test doubles for the network seam.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{Network, NetworkError, Request, Snapshot};

/// A network that answers from a fixed table.
///
/// Unknown keys get a 404 while online; everything fails while offline.
pub struct ScriptedNetwork {
  responses: Mutex<HashMap<String, Snapshot>>,
  online: AtomicBool,
  calls: AtomicUsize,
  delay: Mutex<Option<Duration>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
      delay: Mutex::new(None),
    }
  }

  pub fn serve(&self, key: &str, content_type: &str, body: &str) {
    self.serve_snapshot(key, Snapshot::new(200, content_type, body));
  }

  pub fn serve_snapshot(&self, key: &str, snapshot: Snapshot) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(key.to_string(), snapshot);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Make every fetch take at least `delay`.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Snapshot, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if !self.online.load(Ordering::SeqCst) {
      return Err(NetworkError::Offline("network unreachable".to_string()));
    }

    let response = self.responses.lock().unwrap().get(&request.key).cloned();
    Ok(response.unwrap_or_else(Snapshot::not_found))
  }
}
