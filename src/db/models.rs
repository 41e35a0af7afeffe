use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// Longest caption accepted, in characters.
pub const MAX_CAPTION_CHARS: usize = 2200;

/// Hex length of a SHA-256 digest.
const PASSWORD_HASH_LEN: usize = 64;

/// The two collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  Posts,
  Users,
}

impl Collection {
  pub fn table(&self) -> &'static str {
    match self {
      Collection::Posts => "posts",
      Collection::Users => "users",
    }
  }

  pub fn key_column(&self) -> &'static str {
    match self {
      Collection::Posts => "id",
      Collection::Users => "username",
    }
  }
}

/// A record that can live in one of the store's collections.
pub trait Record: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static {
  const COLLECTION: Collection;

  /// Primary key within the collection.
  fn key(&self) -> &str;

  /// Value of the ordering index, for collections that have one.
  fn sort_key(&self) -> Option<i64> {
    None
  }

  /// Check the record before it may touch storage.
  fn validate(&self) -> Result<(), StoreError>;

  /// Check that replacing `existing` with `self` keeps the record's invariants.
  fn check_replace(&self, _existing: &Self) -> Result<(), StoreError> {
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geo {
  pub lat: f64,
  pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
  pub id: String,
  /// Creation time in milliseconds since the epoch.
  pub ts: i64,
  /// Image payload as a `data:image/...;base64,` URL.
  pub data: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub caption: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub geo: Option<Geo>,
  #[serde(default)]
  pub likes: u64,
}

impl Post {
  /// A new post with no likes, keyed by its creation time.
  pub fn new(ts: i64, data: String) -> Self {
    Self {
      id: format!("p_{}", ts),
      ts,
      data,
      caption: None,
      geo: None,
      likes: 0,
    }
  }

  pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
    self.caption = Some(caption.into());
    self
  }

  pub fn with_geo(mut self, lat: f64, lon: f64) -> Self {
    self.geo = Some(Geo { lat, lon });
    self
  }
}

impl Record for Post {
  const COLLECTION: Collection = Collection::Posts;

  fn key(&self) -> &str {
    &self.id
  }

  fn sort_key(&self) -> Option<i64> {
    Some(self.ts)
  }

  fn validate(&self) -> Result<(), StoreError> {
    if self.id.trim().is_empty() {
      return Err(StoreError::validation("post is missing an id"));
    }
    if self.ts <= 0 {
      return Err(StoreError::validation("post is missing a timestamp"));
    }
    if self.data.is_empty() {
      return Err(StoreError::validation("post is missing image data"));
    }
    validate_image_data(&self.data)?;

    if let Some(caption) = &self.caption {
      let chars = caption.chars().count();
      if chars > MAX_CAPTION_CHARS {
        return Err(StoreError::validation(format!(
          "caption is {} characters, limit is {}",
          chars, MAX_CAPTION_CHARS
        )));
      }
    }

    if let Some(geo) = &self.geo {
      if !geo.lat.is_finite() || !(-90.0..=90.0).contains(&geo.lat) {
        return Err(StoreError::validation(format!("latitude {} out of range", geo.lat)));
      }
      if !geo.lon.is_finite() || !(-180.0..=180.0).contains(&geo.lon) {
        return Err(StoreError::validation(format!("longitude {} out of range", geo.lon)));
      }
    }

    Ok(())
  }

  fn check_replace(&self, existing: &Self) -> Result<(), StoreError> {
    if self.ts != existing.ts {
      return Err(StoreError::validation(format!(
        "timestamp of post '{}' cannot change",
        self.id
      )));
    }
    if self.likes < existing.likes {
      return Err(StoreError::validation(format!(
        "likes of post '{}' cannot decrease ({} -> {})",
        self.id, existing.likes, self.likes
      )));
    }
    Ok(())
  }
}

/// Build a data URL for an image payload.
pub fn image_data_url(mime: &str, bytes: &[u8]) -> String {
  format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// The payload must be a base64 `data:` URL with an `image/*` media type.
fn validate_image_data(data: &str) -> Result<(), StoreError> {
  let rest = data
    .strip_prefix("data:")
    .ok_or_else(|| StoreError::validation("image data must be a data: URL"))?;
  let (header, payload) = rest
    .split_once(',')
    .ok_or_else(|| StoreError::validation("image data URL has no payload"))?;
  let mime = header
    .strip_suffix(";base64")
    .ok_or_else(|| StoreError::validation("image data URL must be base64 encoded"))?;

  let is_image = mime
    .strip_prefix("image/")
    .map(|subtype| !subtype.is_empty())
    .unwrap_or(false);
  if !is_image {
    return Err(StoreError::validation(format!(
      "'{}' is not an image media type",
      mime
    )));
  }

  if payload.is_empty() {
    return Err(StoreError::validation("image data URL has an empty payload"));
  }
  STANDARD
    .decode(payload)
    .map_err(|e| StoreError::validation(format!("image payload is not valid base64: {}", e)))?;

  Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub username: String,
  pub password_hash: String,
}

impl Record for User {
  const COLLECTION: Collection = Collection::Users;

  fn key(&self) -> &str {
    &self.username
  }

  fn validate(&self) -> Result<(), StoreError> {
    if self.username.trim().is_empty() {
      return Err(StoreError::validation("user is missing a username"));
    }
    let hash = &self.password_hash;
    let is_digest = hash.len() == PASSWORD_HASH_LEN
      && hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
      && hex::decode(hash).is_ok();
    if !is_digest {
      return Err(StoreError::validation(
        "password hash must be a 64 character lowercase hex digest",
      ));
    }
    Ok(())
  }
}


#[cfg(test)]
mod tests {
  use super::fixtures::*;
  use super::*;

  #[test]
  fn test_valid_post_passes() {
    let p = post(1_700_000_000_000)
      .with_caption("sunset")
      .with_geo(52.2297, 21.0122);
    assert!(p.validate().is_ok());
    assert_eq!(p.id, "p_1700000000000");
  }

  #[test]
  fn test_missing_required_fields_rejected() {
    let mut no_id = post(1);
    no_id.id = String::new();
    assert!(matches!(no_id.validate(), Err(StoreError::Validation(_))));

    let no_ts = post(0);
    assert!(matches!(no_ts.validate(), Err(StoreError::Validation(_))));

    let mut no_data = post(1);
    no_data.data = String::new();
    assert!(matches!(no_data.validate(), Err(StoreError::Validation(_))));
  }

  #[test]
  fn test_non_image_payload_rejected() {
    let mut p = post(1);
    p.data = "data:text/plain;base64,aGVsbG8=".to_string();
    assert!(matches!(p.validate(), Err(StoreError::Validation(_))));

    p.data = "https://example.com/cat.png".to_string();
    assert!(matches!(p.validate(), Err(StoreError::Validation(_))));

    p.data = "data:image/png;base64,not base64!".to_string();
    assert!(matches!(p.validate(), Err(StoreError::Validation(_))));
  }

  #[test]
  fn test_caption_length_bounded() {
    let ok = post(1).with_caption("a".repeat(MAX_CAPTION_CHARS));
    assert!(ok.validate().is_ok());

    let too_long = post(1).with_caption("a".repeat(MAX_CAPTION_CHARS + 1));
    assert!(matches!(too_long.validate(), Err(StoreError::Validation(_))));
  }

  #[test]
  fn test_geo_range_checked() {
    assert!(post(1).with_geo(91.0, 0.0).validate().is_err());
    assert!(post(1).with_geo(0.0, -180.5).validate().is_err());
    assert!(post(1).with_geo(f64::NAN, 0.0).validate().is_err());
    assert!(post(1).with_geo(-90.0, 180.0).validate().is_ok());
  }

  #[test]
  fn test_post_json_uses_camel_case_and_defaults_likes() {
    let json = format!(r#"{{"id":"p_5","ts":5,"data":"{}"}}"#, PIXEL_PNG);
    let p: Post = serde_json::from_str(&json).unwrap();
    assert_eq!(p.likes, 0);
    assert_eq!(p.caption, None);

    let user_json = serde_json::to_value(user("ola")).unwrap();
    assert!(user_json.get("passwordHash").is_some());
  }

  #[test]
  fn test_image_data_url_round_trips_validation() {
    let mut p = post(1);
    p.data = image_data_url("image/jpeg", &[0xff, 0xd8, 0xff, 0xe0]);
    assert!(p.data.starts_with("data:image/jpeg;base64,"));
    assert!(p.validate().is_ok());
  }

  #[test]
  fn test_user_requires_hex_digest() {
    assert!(user("ola").validate().is_ok());

    let mut plaintext = user("ola");
    plaintext.password_hash = "hunter22".to_string();
    assert!(matches!(plaintext.validate(), Err(StoreError::Validation(_))));

    let mut upper = user("ola");
    upper.password_hash = upper.password_hash.to_uppercase();
    assert!(upper.validate().is_err());

    let mut nameless = user("");
    nameless.username = "  ".to_string();
    assert!(nameless.validate().is_err());
  }
}
