//! User operations.

use super::error::StoreError;
use super::models::User;
use super::Store;

impl Store {
  pub async fn add_user(&self, user: User) -> Result<(), StoreError> {
    self.add(user).await
  }

  pub async fn put_user(&self, user: User) -> Result<(), StoreError> {
    self.put(user).await
  }

  /// Exact-key lookup. An empty or unknown username is `Ok(None)`.
  pub async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
    if username.is_empty() {
      return Ok(None);
    }
    self.get::<User>(username).await
  }

  pub async fn delete_user(&self, username: &str) -> Result<(), StoreError> {
    self.delete::<User>(username).await
  }
}
