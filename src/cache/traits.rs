//! Core types for the asset cache: requests, response snapshots and the
//! network seam the router fetches through.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

/// Base used to resolve relative request targets into cache keys.
const KEY_BASE: &str = "http://minigram.invalid/";

/// Reduce a request target to the key it is cached under.
///
/// Targets on the application's own origin become `path[?query]`, so
/// `./index.html` and `/index.html` share a key and `./` maps to `/`.
/// Targets on any other origin keep their full URL.
pub fn normalize_key(target: &str) -> String {
  let target = target.trim();
  let resolved = Url::parse(KEY_BASE).and_then(|base| Ok((base.join(target)?, base)));
  match resolved {
    Ok((mut url, base)) if url.origin() != base.origin() => {
      url.set_fragment(None);
      url.to_string()
    }
    Ok((url, _)) => match url.query() {
      Some(query) => format!("{}?{}", url.path(), query),
      None => url.path().to_string(),
    },
    Err(_) => format!("/{}", target.trim_start_matches("./")),
  }
}

/// Whether a key names a resource on another origin.
pub fn is_cross_origin(key: &str) -> bool {
  !key.starts_with('/')
}

/// How the request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// A full document load into the display surface.
  Navigate,
  /// Anything loaded by a document: styles, scripts, images, data.
  Subresource,
}

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Style,
  Script,
  Image,
  Font,
  Manifest,
  /// No hint (e.g. a plain data fetch).
  Empty,
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "document" => Ok(Destination::Document),
      "style" => Ok(Destination::Style),
      "script" => Ok(Destination::Script),
      "image" => Ok(Destination::Image),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      "" | "empty" => Ok(Destination::Empty),
      other => Err(format!("unknown destination '{}'", other)),
    }
  }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  /// Normalized cache key, see [`normalize_key`].
  pub key: String,
  pub mode: RequestMode,
  pub destination: Destination,
  pub accept: Option<String>,
}

impl Request {
  /// A plain GET for a sub-resource.
  pub fn get(target: &str) -> Self {
    Self {
      method: "GET".to_string(),
      key: normalize_key(target),
      mode: RequestMode::Subresource,
      destination: Destination::Empty,
      accept: None,
    }
  }

  /// A document navigation.
  pub fn navigate(target: &str) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      accept: Some("text/html".to_string()),
      ..Self::get(target)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  /// Only GET responses are ever read from or written to a bucket.
  pub fn is_get(&self) -> bool {
    self.method == "GET"
  }

  /// The key without its query string.
  pub fn path(&self) -> &str {
    self.key.split('?').next().unwrap_or(&self.key)
  }
}

/// An immutable copy of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Snapshot {
  pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  /// Synthesized 503 for navigations with nothing cached to fall back on.
  pub fn service_unavailable() -> Self {
    Self::new(503, "text/plain; charset=utf-8", "Offline Content Not Available")
  }

  /// Synthesized 404 for static assets that could not be fetched.
  pub fn not_found() -> Self {
    Self {
      status: 404,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// Synthesized empty response for uncategorized requests that failed.
  pub fn empty() -> Self {
    Self {
      status: 504,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }
}

/// Transport failure while fetching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
  #[error("offline: {0}")]
  Offline(String),
  #[error("request timed out")]
  Timeout,
  #[error("transport error: {0}")]
  Transport(String),
}

/// Delivers requests to the network. Provided by the host.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Snapshot, NetworkError>;
}

/// A snapshot as read back from bucket storage.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  pub snapshot: Snapshot,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Snapshot from the current bucket
  Cache,
  /// The cached offline page, served for a failed navigation
  OfflineFallback,
  /// The placeholder image, served for a failed image request
  Placeholder,
  /// Built locally because nothing better was available
  Synthesized,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ResponseSource::Network => "network",
      ResponseSource::Cache => "cache",
      ResponseSource::OfflineFallback => "offline-fallback",
      ResponseSource::Placeholder => "placeholder",
      ResponseSource::Synthesized => "synthesized",
    };
    f.write_str(name)
  }
}

/// A response handed back to the requester, tagged with its source.
#[derive(Debug, Clone)]
pub struct Routed {
  pub response: Snapshot,
  pub source: ResponseSource,
}

impl Routed {
  pub fn from_network(response: Snapshot) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
    }
  }

  pub fn from_cache(response: Snapshot) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
    }
  }

  pub fn fallback(response: Snapshot, source: ResponseSource) -> Self {
    Self { response, source }
  }

  pub fn synthesized(response: Snapshot) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
    }
  }
}
