use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::cache::{FetchRouter, Request, Routed, ShellManager, SqliteStorage};
use crate::config::Config;
use crate::db::{image_data_url, Post, Store};
use crate::http::HttpNetwork;

pub type Shell = ShellManager<SqliteStorage, HttpNetwork>;

/// Application state: the local store plus the routed view of the network.
pub struct App {
  store: Store,
  router: FetchRouter<SqliteStorage, HttpNetwork>,
}

impl App {
  pub async fn new(config: Config) -> Result<Self> {
    let store = Store::open(config.store_config()?).await?;

    let storage = Arc::new(SqliteStorage::open(&config.bucket_path()?)?);
    let network = Arc::new(HttpNetwork::new(&config.origin, config.fetch_timeout())?);
    let shell = Arc::new(ShellManager::new(storage, network, config.shell.clone()));

    Ok(Self {
      store,
      router: FetchRouter::new(shell),
    })
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  pub fn shell(&self) -> &Shell {
    self.router.shell()
  }

  /// Publish an image file as a new post.
  pub async fn publish(
    &self,
    image: &Path,
    caption: Option<String>,
    geo: Option<(f64, f64)>,
  ) -> Result<Post> {
    let bytes = std::fs::read(image)
      .map_err(|e| eyre!("Failed to read image {}: {}", image.display(), e))?;
    let mime = mime_guess::from_path(image)
      .first()
      .filter(|m| m.type_() == mime_guess::mime::IMAGE)
      .ok_or_else(|| eyre!("{} does not look like an image", image.display()))?;

    let mut post = Post::new(
      Utc::now().timestamp_millis(),
      image_data_url(mime.essence_str(), &bytes),
    );
    if let Some(caption) = caption.filter(|c| !c.is_empty()) {
      post = post.with_caption(caption);
    }
    if let Some((lat, lon)) = geo {
      post = post.with_geo(lat, lon);
    }

    self.store.add_post(post.clone()).await?;
    info!(id = %post.id, bytes = bytes.len(), "published post");
    Ok(post)
  }

  /// Send a request through the router.
  pub async fn fetch(&self, request: &Request) -> Routed {
    self.router.handle(request).await
  }

  /// Give background cache refreshes up to `budget` to finish before exit.
  pub async fn settle(&self, budget: Duration) {
    let abandoned = self.router.settle(budget).await;
    if abandoned > 0 {
      warn!(abandoned, "exiting with cache refreshes still in flight");
    }
  }
}
