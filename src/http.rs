//! Host network adapter: delivers routed requests over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::cache::{is_cross_origin, Network, NetworkError, Request, Snapshot};

/// Fetches request keys relative to the application origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: &str, timeout: Duration) -> Result<Self> {
    let mut origin =
      Url::parse(origin).map_err(|e| eyre!("Invalid origin URL '{}': {}", origin, e))?;
    // Keys are joined onto the origin, so it must look like a directory.
    if !origin.path().ends_with('/') {
      let path = format!("{}/", origin.path());
      origin.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("minigram/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  /// Absolute URL for a cache key. Keys for other origins already are one.
  pub fn resolve(&self, key: &str) -> Result<Url, NetworkError> {
    let resolved = if is_cross_origin(key) {
      Url::parse(key)
    } else {
      self.origin.join(key.trim_start_matches('/'))
    };
    resolved.map_err(|e| NetworkError::Transport(format!("cannot resolve '{}': {}", key, e)))
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Snapshot, NetworkError> {
    let url = self.resolve(&request.key)?;
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| NetworkError::Transport(format!("invalid method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, url);
    if let Some(accept) = &request.accept {
      builder = builder.header(reqwest::header::ACCEPT, accept);
    }

    let response = builder.send().await.map_err(transport_error)?;
    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response.bytes().await.map_err(transport_error)?.to_vec();

    Ok(Snapshot {
      status,
      headers,
      body,
    })
  }
}

fn transport_error(e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout
  } else if e.is_connect() {
    NetworkError::Offline(e.to_string())
  } else {
    NetworkError::Transport(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keys_resolve_under_origin() {
    let net = HttpNetwork::new("http://localhost:8080/app", Duration::from_secs(1)).unwrap();
    assert_eq!(
      net.resolve("/index.html").unwrap().as_str(),
      "http://localhost:8080/app/index.html"
    );
    assert_eq!(net.resolve("/").unwrap().as_str(), "http://localhost:8080/app/");
    assert_eq!(
      net.resolve("/app.js?v=2").unwrap().as_str(),
      "http://localhost:8080/app/app.js?v=2"
    );
  }

  #[test]
  fn test_other_origin_keys_fetched_from_their_own_host() {
    let net = HttpNetwork::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
    let cdn = Request::get("https://cdn.example.com/lib.js");
    assert_eq!(
      net.resolve(&cdn.key).unwrap().as_str(),
      "https://cdn.example.com/lib.js"
    );
    assert_eq!(
      net.resolve(&Request::get("/lib.js").key).unwrap().as_str(),
      "http://localhost:8080/lib.js"
    );
  }

  #[test]
  fn test_invalid_origin_rejected() {
    assert!(HttpNetwork::new("not a url", Duration::from_secs(1)).is_err());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_a_network_error() {
    // Port 9 on localhost is reserved for discard and normally closed.
    let net = HttpNetwork::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
    let result = net.fetch(&Request::get("./index.html")).await;
    assert!(result.is_err());
  }
}
