//! Request interception and per-class fetch strategies.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::classify::{classify, is_image, Strategy};
use super::shell::ShellManager;
use super::storage::BucketStorage;
use super::traits::{normalize_key, Network, Request, ResponseSource, Routed, Snapshot};

/// Answers every request the application makes, from the network, the
/// current shell bucket, or a local fallback.
///
/// `handle` always resolves: network failures are absorbed wherever a
/// fallback exists and otherwise turned into a synthesized response.
/// Background revalidations never delay a response, but they are tracked so
/// a short-lived process can let them finish with [`FetchRouter::settle`].
pub struct FetchRouter<S: BucketStorage, N: Network> {
  shell: Arc<ShellManager<S, N>>,
  pending: Mutex<JoinSet<()>>,
}

impl<S, N> FetchRouter<S, N>
where
  S: BucketStorage + 'static,
  N: Network + 'static,
{
  pub fn new(shell: Arc<ShellManager<S, N>>) -> Self {
    Self {
      shell,
      pending: Mutex::new(JoinSet::new()),
    }
  }

  pub fn shell(&self) -> &Arc<ShellManager<S, N>> {
    &self.shell
  }

  /// Route one intercepted request.
  pub async fn handle(&self, request: &Request) -> Routed {
    let strategy = classify(request);
    debug!(key = %request.key, method = %request.method, ?strategy, "routing request");

    match strategy {
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  /// Navigations: live response when online, offline page otherwise.
  async fn network_first(&self, request: &Request) -> Routed {
    match self.shell.network().fetch(request).await {
      Ok(response) => {
        self.remember(request, &response);
        Routed::from_network(response)
      }
      Err(e) => {
        warn!(key = %request.key, error = %e, "navigation failed; serving offline page");
        let offline_key = normalize_key(&self.shell.config().offline_page);
        match self.cached_key(&offline_key) {
          Some(page) => Routed::fallback(page, ResponseSource::OfflineFallback),
          None => Routed::synthesized(Snapshot::service_unavailable()),
        }
      }
    }
  }

  /// Static assets: cached copy now, fresh copy for next time.
  async fn stale_while_revalidate(&self, request: &Request) -> Routed {
    if let Some(cached) = self.cached(request) {
      // The response below never waits on it.
      self.revalidate(request.clone());
      return Routed::from_cache(cached);
    }

    match self.shell.network().fetch(request).await {
      Ok(response) => {
        self.remember(request, &response);
        Routed::from_network(response)
      }
      Err(e) => {
        debug!(key = %request.key, error = %e, "static asset unavailable");
        if is_image(request) {
          // Served as-is, never written back under the requested key.
          let placeholder_key = normalize_key(&self.shell.config().placeholder_image);
          if let Some(placeholder) = self.cached_key(&placeholder_key) {
            return Routed::fallback(placeholder, ResponseSource::Placeholder);
          }
        }
        Routed::synthesized(Snapshot::not_found())
      }
    }
  }

  /// Everything else: cache if present, network otherwise.
  async fn cache_first(&self, request: &Request) -> Routed {
    if let Some(cached) = self.cached(request) {
      return Routed::from_cache(cached);
    }

    match self.shell.network().fetch(request).await {
      Ok(response) => Routed::from_network(response),
      Err(e) => {
        debug!(key = %request.key, error = %e, "request failed with nothing cached");
        Routed::synthesized(Snapshot::empty())
      }
    }
  }

  /// Re-fetch in the background and overwrite the cached copy on success.
  /// Failures leave the stale copy in place.
  pub(crate) fn revalidate(&self, request: Request) {
    let shell = Arc::clone(&self.shell);
    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    // Reap finished refreshes so the set only holds live ones.
    while pending.try_join_next().is_some() {}

    pending.spawn(async move {
      match shell.network().fetch(&request).await {
        Ok(fresh) if fresh.is_ok() => {
          if let Err(e) = shell.store(&request.key, &fresh) {
            debug!(key = %request.key, error = %e, "could not store revalidated asset");
          } else {
            debug!(key = %request.key, "revalidated asset");
          }
        }
        Ok(fresh) => {
          debug!(key = %request.key, status = fresh.status, "revalidation got an error status; keeping cached copy");
        }
        Err(e) => {
          debug!(key = %request.key, error = %e, "revalidation failed; keeping cached copy");
        }
      }
    });
  }

  /// Wait up to `budget` for outstanding revalidations. Returns how many
  /// were still running when the budget ran out; those are abandoned.
  pub async fn settle(&self, budget: Duration) -> usize {
    let mut pending = {
      let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *guard)
    };
    if pending.is_empty() {
      return 0;
    }

    let drained = tokio::time::timeout(budget, async {
      while pending.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
      warn!(left = pending.len(), ?budget, "abandoning unfinished revalidations");
    }
    pending.len()
  }

  fn cached(&self, request: &Request) -> Option<Snapshot> {
    if !request.is_get() {
      return None;
    }
    self.cached_key(&request.key)
  }

  /// Bucket lookup where a storage failure counts as a miss.
  fn cached_key(&self, key: &str) -> Option<Snapshot> {
    match self.shell.lookup(key) {
      Ok(found) => found,
      Err(e) => {
        warn!(key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Keep a copy of a successful GET response in the current bucket.
  fn remember(&self, request: &Request, response: &Snapshot) {
    if !request.is_get() || !response.is_ok() {
      return;
    }
    if let Err(e) = self.shell.store(&request.key, response) {
      warn!(key = %request.key, error = %e, "could not cache response");
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::super::shell::ShellConfig;
  use super::super::storage::SqliteStorage;
  use super::super::testing::ScriptedNetwork;
  use super::super::traits::Destination;
  use super::*;

  struct Fixture {
    network: Arc<ScriptedNetwork>,
    router: FetchRouter<SqliteStorage, ScriptedNetwork>,
  }

  impl Fixture {
    fn new() -> Self {
      let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
      let network = Arc::new(ScriptedNetwork::new());
      let config = ShellConfig {
        version: "v1".to_string(),
        assets: vec!["./offline.html".to_string(), "./icons/icon-192.png".to_string()],
        offline_page: "./offline.html".to_string(),
        placeholder_image: "./icons/icon-192.png".to_string(),
      };
      let shell = Arc::new(ShellManager::new(storage, network.clone(), config));
      Self {
        network,
        router: FetchRouter::new(shell),
      }
    }

    fn shell(&self) -> &ShellManager<SqliteStorage, ScriptedNetwork> {
      self.router.shell()
    }

    /// Poll the bucket until `key` holds `body`, for background updates.
    async fn wait_for_body(&self, key: &str, body: &[u8]) -> bool {
      for _ in 0..100 {
        if let Ok(Some(snap)) = self.shell().lookup(key) {
          if snap.body == body {
            return true;
          }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
      }
      false
    }
  }

  #[tokio::test]
  async fn test_navigation_online_returns_and_stores() {
    let fx = Fixture::new();
    fx.network.serve("/index.html", "text/html", "<h1>feed</h1>");

    let routed = fx.router.handle(&Request::navigate("./index.html")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body, b"<h1>feed</h1>");

    let stored = fx.shell().lookup("/index.html").unwrap().unwrap();
    assert_eq!(stored.body, b"<h1>feed</h1>");
  }

  #[tokio::test]
  async fn test_navigation_offline_serves_cached_offline_page() {
    let fx = Fixture::new();
    fx.network.serve("/offline.html", "text/html", "<h1>offline</h1>");
    fx.network.serve("/index.html", "text/html", "<h1>feed</h1>");
    fx.shell().install().await.unwrap_err();
    assert!(fx.shell().lookup("/offline.html").unwrap().is_some());

    fx.router.handle(&Request::navigate("./index.html")).await;
    fx.network.set_online(false);

    let routed = fx.router.handle(&Request::navigate("./index.html")).await;
    assert_eq!(routed.source, ResponseSource::OfflineFallback);
    assert_eq!(routed.response.body, b"<h1>offline</h1>");
  }

  #[tokio::test]
  async fn test_navigation_offline_without_fallback_is_503() {
    let fx = Fixture::new();
    fx.network.set_online(false);

    let routed = fx.router.handle(&Request::navigate("./")).await;
    assert_eq!(routed.source, ResponseSource::Synthesized);
    assert_eq!(routed.response.status, 503);
  }

  #[tokio::test]
  async fn test_navigation_error_status_not_cached() {
    let fx = Fixture::new();
    let routed = fx.router.handle(&Request::navigate("./gone.html")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.status, 404);
    assert!(fx.shell().lookup("/gone.html").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cached_asset_served_even_when_revalidation_fails() {
    let fx = Fixture::new();
    let cached = Snapshot::new(200, "text/css", "body{color:red}");
    fx.shell().store("/styles.css", &cached).unwrap();
    fx.network.set_online(false);

    let routed = fx.router.handle(&Request::get("./styles.css")).await;
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response, cached);

    // Let the background fetch fail, then check nothing changed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fx.network.calls() >= 1);
    assert_eq!(fx.shell().lookup("/styles.css").unwrap(), Some(cached));
  }

  #[tokio::test]
  async fn test_cached_asset_not_delayed_by_slow_revalidation() {
    let fx = Fixture::new();
    fx.shell()
      .store("/app.js", &Snapshot::new(200, "text/javascript", "v1"))
      .unwrap();
    fx.network.serve("/app.js", "text/javascript", "v2");
    fx.network.set_delay(Duration::from_secs(5));

    let routed = tokio::time::timeout(
      Duration::from_secs(1),
      fx.router.handle(&Request::get("./app.js")),
    )
    .await
    .expect("cached response must not wait for the network");
    assert_eq!(routed.response.body, b"v1");
  }

  #[tokio::test]
  async fn test_revalidation_refreshes_cached_asset() {
    let fx = Fixture::new();
    fx.shell()
      .store("/app.js", &Snapshot::new(200, "text/javascript", "v1"))
      .unwrap();
    fx.network.serve("/app.js", "text/javascript", "v2");

    let routed = fx.router.handle(&Request::get("./app.js")).await;
    assert_eq!(routed.response.body, b"v1");
    assert!(fx.wait_for_body("/app.js", b"v2").await);

    let next = fx.router.handle(&Request::get("./app.js")).await;
    assert_eq!(next.source, ResponseSource::Cache);
    assert_eq!(next.response.body, b"v2");
  }

  #[tokio::test]
  async fn test_revalidation_keeps_copy_on_error_status() {
    let fx = Fixture::new();
    let cached = Snapshot::new(200, "application/json", "{}");
    fx.shell().store("/manifest.json", &cached).unwrap();
    fx.network
      .serve_snapshot("/manifest.json", Snapshot::new(500, "text/plain", "boom"));

    fx.router.revalidate(Request::get("./manifest.json"));
    assert_eq!(fx.router.settle(Duration::from_secs(1)).await, 0);
    assert_eq!(fx.shell().lookup("/manifest.json").unwrap(), Some(cached));
  }

  #[tokio::test]
  async fn test_settle_lets_refresh_land_before_shutdown() {
    let fx = Fixture::new();
    fx.shell()
      .store("/app.js", &Snapshot::new(200, "text/javascript", "v1"))
      .unwrap();
    fx.network.serve("/app.js", "text/javascript", "v2");
    fx.network.set_delay(Duration::from_millis(20));

    let routed = fx.router.handle(&Request::get("./app.js")).await;
    assert_eq!(routed.response.body, b"v1");

    assert_eq!(fx.router.settle(Duration::from_secs(2)).await, 0);
    assert_eq!(fx.shell().lookup("/app.js").unwrap().unwrap().body, b"v2");
  }

  #[tokio::test]
  async fn test_settle_is_bounded() {
    let fx = Fixture::new();
    fx.shell()
      .store("/app.js", &Snapshot::new(200, "text/javascript", "v1"))
      .unwrap();
    fx.network.serve("/app.js", "text/javascript", "v2");
    fx.network.set_delay(Duration::from_secs(5));

    fx.router.handle(&Request::get("./app.js")).await;
    assert_eq!(fx.router.settle(Duration::from_millis(50)).await, 1);
    assert_eq!(fx.router.settle(Duration::from_millis(50)).await, 0);
    assert_eq!(fx.shell().lookup("/app.js").unwrap().unwrap().body, b"v1");
  }

  #[tokio::test]
  async fn test_uncached_asset_fetched_and_cached() {
    let fx = Fixture::new();
    fx.network.serve("/styles.css", "text/css", "body{}");

    let routed = fx.router.handle(&Request::get("./styles.css")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert!(fx.shell().lookup("/styles.css").unwrap().is_some());
  }

  #[tokio::test]
  async fn test_missing_image_offline_gets_placeholder_without_poisoning() {
    let fx = Fixture::new();
    let placeholder = Snapshot::new(200, "image/png", "icon");
    fx.shell().store("/icons/icon-192.png", &placeholder).unwrap();
    fx.network.set_online(false);

    let req = Request::get("/photos/p_1.jpg").with_destination(Destination::Image);
    let routed = fx.router.handle(&req).await;
    assert_eq!(routed.source, ResponseSource::Placeholder);
    assert_eq!(routed.response, placeholder);
    assert!(fx.shell().lookup("/photos/p_1.jpg").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_missing_asset_offline_is_404() {
    let fx = Fixture::new();
    fx.network.set_online(false);

    let css = fx.router.handle(&Request::get("./styles.css")).await;
    assert_eq!(css.source, ResponseSource::Synthesized);
    assert_eq!(css.response.status, 404);

    // No placeholder cached either.
    let img = fx.router.handle(&Request::get("./icons/icon-96.png")).await;
    assert_eq!(img.response.status, 404);
  }

  #[tokio::test]
  async fn test_other_requests_prefer_cache() {
    let fx = Fixture::new();
    fx.shell()
      .store("/api/feed", &Snapshot::new(200, "text/plain", "cached"))
      .unwrap();
    fx.network.serve("/api/feed", "text/plain", "live");

    let routed = fx.router.handle(&Request::get("/api/feed")).await;
    assert_eq!(routed.source, ResponseSource::Cache);
    assert_eq!(routed.response.body, b"cached");
    assert_eq!(fx.network.calls(), 0);
  }

  #[tokio::test]
  async fn test_other_requests_pass_through_without_caching() {
    let fx = Fixture::new();
    fx.network.serve("/api/feed", "text/plain", "live");

    let routed = fx.router.handle(&Request::get("/api/feed")).await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body, b"live");
    assert!(fx.shell().lookup("/api/feed").unwrap().is_none());
  }

  #[tokio::test]
  async fn test_other_requests_offline_resolve_empty() {
    let fx = Fixture::new();
    fx.network.set_online(false);

    let routed = fx
      .router
      .handle(&Request::get("/api/upload").with_method("POST"))
      .await;
    assert_eq!(routed.source, ResponseSource::Synthesized);
    assert!(routed.response.body.is_empty());
    assert_eq!(routed.response.status, 504);
  }

  #[tokio::test]
  async fn test_non_get_never_served_from_cache() {
    let fx = Fixture::new();
    fx.shell()
      .store("/api/feed", &Snapshot::new(200, "text/plain", "cached"))
      .unwrap();
    fx.network.serve("/api/feed", "text/plain", "posted");

    let routed = fx
      .router
      .handle(&Request::get("/api/feed").with_method("POST"))
      .await;
    assert_eq!(routed.source, ResponseSource::Network);
    assert_eq!(routed.response.body, b"posted");
  }
}
