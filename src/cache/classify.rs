//! Request classification.
//!
//! A pure function of request metadata, so the dispatch decision can be
//! tested without a network or a bucket.

use mime_guess::mime;

use super::traits::{Destination, Request, RequestMode};

/// The fetch strategy a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Navigations: network first, cached offline page on failure.
  NetworkFirst,
  /// Static assets: serve cached copy, refresh it in the background.
  StaleWhileRevalidate,
  /// Everything else: cache if present, otherwise network.
  CacheFirst,
}

/// Pick the strategy for a request. Navigation wins over static-asset hints.
pub fn classify(request: &Request) -> Strategy {
  if is_navigation(request) {
    Strategy::NetworkFirst
  } else if is_static_asset(request) {
    Strategy::StaleWhileRevalidate
  } else {
    Strategy::CacheFirst
  }
}

fn is_navigation(request: &Request) -> bool {
  request.mode == RequestMode::Navigate
    || (request.destination == Destination::Document && request.is_get())
}

/// Styles, scripts, images and structured data, by destination, accept
/// header or file name.
pub fn is_static_asset(request: &Request) -> bool {
  if matches!(
    request.destination,
    Destination::Style | Destination::Script | Destination::Image
  ) {
    return true;
  }
  if accepts_image(request) {
    return true;
  }

  let path = request.path();
  if path.ends_with(".json") {
    return true;
  }
  match mime_guess::from_path(path).first() {
    Some(guess) => {
      guess.type_() == mime::IMAGE
        || guess.subtype() == mime::CSS
        || guess.subtype() == mime::JAVASCRIPT
        || guess.subtype() == mime::JSON
        || guess.suffix().map(|s| s == mime::JSON).unwrap_or(false)
    }
    None => false,
  }
}

/// Whether a failed fetch of this request should get the placeholder image.
pub fn is_image(request: &Request) -> bool {
  request.destination == Destination::Image
    || accepts_image(request)
    || mime_guess::from_path(request.path())
      .first()
      .map(|guess| guess.type_() == mime::IMAGE)
      .unwrap_or(false)
}

fn accepts_image(request: &Request) -> bool {
  request
    .accept
    .as_deref()
    .map(|accept| accept.trim_start().starts_with("image/"))
    .unwrap_or(false)
}
