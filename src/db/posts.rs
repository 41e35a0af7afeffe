//! Post operations.

use rusqlite::params;
use tracing::debug;

use super::error::StoreError;
use super::guard::Operation;
use super::models::Post;
use super::{encode, read_row, Store};

impl Store {
  pub async fn add_post(&self, post: Post) -> Result<(), StoreError> {
    self.add(post).await
  }

  pub async fn put_post(&self, post: Post) -> Result<(), StoreError> {
    self.put(post).await
  }

  pub async fn get_post(&self, id: &str) -> Result<Option<Post>, StoreError> {
    self.get::<Post>(id).await
  }

  pub async fn delete_post(&self, id: &str) -> Result<(), StoreError> {
    self.delete::<Post>(id).await
  }

  /// All posts, newest first.
  ///
  /// Rows come off the `ts` index walked backwards, so the order is decided
  /// by storage rather than by sorting afterwards.
  pub async fn get_all_posts(&self) -> Result<Vec<Post>, StoreError> {
    self
      .run(Operation::Scan, |conn| {
        let mut stmt =
          conn.prepare("SELECT data FROM posts INDEXED BY idx_posts_ts ORDER BY ts DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut posts = Vec::new();
        for row in rows {
          posts.push(serde_json::from_slice::<Post>(&row?)?);
        }
        Ok(posts)
      })
      .await
  }

  /// Add one like to a post and return the updated record.
  ///
  /// Read and write happen in one transaction, so a like racing a delete
  /// either lands before it or fails with `NotFound`.
  pub async fn like_post(&self, id: &str) -> Result<Post, StoreError> {
    let id = id.to_string();

    self
      .run(Operation::Write, move |conn| {
        let tx = conn.transaction()?;
        let mut post =
          read_row::<Post>(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
        post.likes = post.likes.saturating_add(1);

        let data = encode(&post)?;
        tx.execute("UPDATE posts SET data = ?1 WHERE id = ?2", params![data, id])?;
        tx.commit()?;

        debug!(id = %id, likes = post.likes, "liked post");
        Ok(post)
      })
      .await
  }
}
