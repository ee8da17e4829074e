use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, Feed, FeedFollow, FeedListing};
use crate::util::sanitize_name;

const FEED_COLUMNS: &str =
    "id, name, url, user_id, created_at, updated_at, last_fetched_at, last_error";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id` and subscribe the owner to it.
    ///
    /// Both rows are written in one transaction: if the follow cannot be
    /// created the feed is rolled back too.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::EmptyName`] if the name is blank
    /// - [`DatabaseError::FeedExists`] if a feed with this URL is already stored
    pub async fn create_feed(
        &self,
        user_id: i64,
        name: &str,
        url: &str,
    ) -> Result<(Feed, FeedFollow), DatabaseError> {
        let name = sanitize_name(name).ok_or(DatabaseError::EmptyName)?;
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let feed = sqlx::query_as::<_, Feed>(&format!(
            "INSERT INTO feeds (name, url, user_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(&name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::FeedExists(url.to_owned())
            } else {
                DatabaseError::from_sqlx(e)
            }
        })?;

        let follow = Self::insert_follow(&mut tx, user_id, feed.id, &feed.name, now).await?;
        tx.commit().await?;

        Ok((feed, follow))
    }

    /// Look up a feed by its exact URL.
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(&format!("SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::FeedNotFound(url.to_owned()))
    }

    /// Every feed with the name of the user who added it, in creation order.
    pub async fn list_feeds(&self) -> Result<Vec<FeedListing>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedListing>(
            r#"
            SELECT f.id, f.name, f.url, u.name AS user_name, f.last_fetched_at, f.last_error
            FROM feeds f
            INNER JOIN users u ON u.id = f.user_id
            ORDER BY f.created_at, f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    // ========================================================================
    // Scheduling Operations
    // ========================================================================

    /// The feed that has waited longest since its last fetch.
    ///
    /// Orders by `last_fetched_at ASC NULLS FIRST`, ties broken by id, so a
    /// feed that has never been fetched is always picked before any fetched
    /// one. `None` means the store has no feeds.
    pub async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Record a fetch attempt at `at` (Unix millis). Single-row atomic write.
    pub async fn mark_fetched(&self, feed_id: i64, at: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Select the next feed and mark it fetched in a single statement.
    ///
    /// Two callers racing on the same database can never claim the same feed
    /// before it has been marked: the selection and the update happen under
    /// one write lock. The returned row carries the new `last_fetched_at`.
    pub async fn claim_next_feed(&self, at: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "UPDATE feeds SET last_fetched_at = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM feeds
                 ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
                 LIMIT 1
             )
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(at)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(feed)
    }

    /// Set or clear the error status for a feed
    pub async fn set_feed_error(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
