//! Offline asset cache and request router.
//!
//! This module provides:
//! - Versioned shell buckets: install from a manifest, purge old versions on activate
//! - A router that answers every request with one of three strategies
//!   (network-first for navigations, stale-while-revalidate for static assets,
//!   cache-first for the rest)
//! - SQLite-backed bucket storage

mod classify;
mod router;
mod shell;
mod storage;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use classify::{classify, Strategy};
pub use router::FetchRouter;
pub use shell::{InstallError, ShellConfig, ShellManager};
pub use storage::{BucketStorage, SqliteStorage};
pub use traits::{
  is_cross_origin, normalize_key, CachedSnapshot, Destination, Network, NetworkError, Request,
  RequestMode, ResponseSource, Routed, Snapshot,
};
