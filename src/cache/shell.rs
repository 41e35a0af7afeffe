//! Versioned application shell cache.
//!
//! One bucket per deployed version. `install` fills the bucket for the current
//! version from the manifest, `activate` purges every other bucket.

use std::sync::Arc;

use color_eyre::Result;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{info, warn};

use super::storage::BucketStorage;
use super::traits::{normalize_key, Network, Request, Snapshot};

/// Which bucket is current and what goes into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Name of the current bucket. Bump it to invalidate the previous shell.
  pub version: String,
  /// Assets fetched at install time.
  pub assets: Vec<String>,
  /// Served for navigations that fail while offline.
  pub offline_page: String,
  /// Served for image requests that fail with nothing cached.
  pub placeholder_image: String,
}

impl Default for ShellConfig {
  fn default() -> Self {
    let assets = [
      "./",
      "./index.html",
      "./add.html",
      "./profile.html",
      "./login.html",
      "./styles.css",
      "./app.js",
      "./db.js",
      "./login.js",
      "./manifest.json",
      "./offline.html",
      "./icons/icon-72.png",
      "./icons/icon-96.png",
      "./icons/icon-128.png",
      "./icons/icon-144.png",
      "./icons/icon-152.png",
      "./icons/icon-192.png",
      "./icons/icon-384.png",
      "./icons/icon-512.png",
      "./icons/icon-512-maskable.png",
    ];

    Self {
      version: "mini-gram-shell-v1".to_string(),
      assets: assets.iter().map(|a| a.to_string()).collect(),
      offline_page: "./offline.html".to_string(),
      placeholder_image: "./icons/icon-192.png".to_string(),
    }
  }
}

/// Installation did not fully populate the bucket.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
  #[error(
    "{count} of {total} shell assets failed to fetch: {list}",
    count = .failed.len(),
    list = .failed.join(", ")
  )]
  Incomplete {
    failed: Vec<String>,
    stored: usize,
    total: usize,
  },
  #[error("shell bucket storage failed: {0}")]
  Storage(String),
}

/// Owns the current shell bucket.
pub struct ShellManager<S: BucketStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  config: ShellConfig,
}

impl<S: BucketStorage, N: Network> ShellManager<S, N> {
  pub fn new(storage: Arc<S>, network: Arc<N>, config: ShellConfig) -> Self {
    Self {
      storage,
      network,
      config,
    }
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  pub fn config(&self) -> &ShellConfig {
    &self.config
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  /// Manifest entries as cache keys, in manifest order and without repeats.
  pub fn manifest(&self) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(self.config.assets.len());
    for asset in &self.config.assets {
      let key = normalize_key(asset);
      if !keys.contains(&key) {
        keys.push(key);
      }
    }
    keys
  }

  /// Fetch every manifest asset into the current bucket.
  ///
  /// Assets that did fetch stay stored even when others failed; the next
  /// attempt overwrites them.
  pub async fn install(&self) -> Result<usize, InstallError> {
    let version = self.version();
    self
      .storage
      .open_bucket(version)
      .map_err(|e| InstallError::Storage(e.to_string()))?;

    let requests: Vec<Request> = self.manifest().iter().map(|key| Request::get(key)).collect();
    let total = requests.len();
    let results = join_all(requests.iter().map(|req| self.network.fetch(req))).await;

    let mut failed = Vec::new();
    let mut stored = 0;
    for (req, result) in requests.iter().zip(results) {
      match result {
        Ok(snapshot) if snapshot.is_ok() => {
          self
            .store(&req.key, &snapshot)
            .map_err(|e| InstallError::Storage(e.to_string()))?;
          stored += 1;
        }
        Ok(snapshot) => {
          warn!(key = %req.key, status = snapshot.status, "shell asset returned an error status");
          failed.push(req.key.clone());
        }
        Err(e) => {
          warn!(key = %req.key, error = %e, "shell asset fetch failed");
          failed.push(req.key.clone());
        }
      }
    }

    if !failed.is_empty() {
      return Err(InstallError::Incomplete {
        failed,
        stored,
        total,
      });
    }

    info!(version, assets = stored, "installed shell");
    Ok(stored)
  }

  /// Delete every bucket except the current one. Returns the deleted names.
  ///
  /// Safe to call again: buckets already gone are simply not listed.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.bucket_names()? {
      if name == self.config.version {
        continue;
      }
      if self.storage.delete_bucket(&name)? {
        info!(bucket = %name, "deleted stale shell bucket");
        deleted.push(name);
      }
    }

    info!(version = %self.config.version, "shell activated");
    Ok(deleted)
  }

  /// Snapshot stored under `key` in the current bucket.
  pub fn lookup(&self, key: &str) -> Result<Option<Snapshot>> {
    Ok(
      self
        .storage
        .get(&self.config.version, key)?
        .map(|cached| cached.snapshot),
    )
  }

  /// Map `key` to `snapshot` in the current bucket, replacing any previous one.
  pub fn store(&self, key: &str, snapshot: &Snapshot) -> Result<()> {
    self.storage.put(&self.config.version, key, snapshot)
  }

  /// Every bucket name known to storage.
  pub fn buckets(&self) -> Result<Vec<String>> {
    self.storage.bucket_names()
  }

  /// Keys held by the current bucket.
  pub fn cached_keys(&self) -> Result<Vec<String>> {
    self.storage.keys(&self.config.version)
  }
}
