use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, FeedItem, NewFeedItem};

const ITEM_SELECT: &str = r#"
    SELECT i.id, i.feed_id, i.title, i.link, i.description, i.published_at, i.created_at,
           f.name AS feed_name
    FROM feed_items i
    INNER JOIN feeds f ON f.id = i.feed_id
"#;

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Store a feed's items, ignoring any whose link is already stored.
    ///
    /// Ingestion is idempotent: duplicates (within the batch, or against rows
    /// inserted earlier by this or a concurrent process) are dropped by the
    /// UNIQUE(feed_id, link) constraint instead of failing the batch.
    ///
    /// # Returns
    ///
    /// The number of newly inserted items.
    pub async fn save_items(
        &self,
        feed_id: i64,
        items: &[NewFeedItem],
    ) -> Result<usize, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        const BATCH_SIZE: usize = 50;
        let now = chrono::Utc::now().timestamp_millis();
        let mut inserted: u64 = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO feed_items (feed_id, title, link, description, published_at, created_at) ",
            );

            builder.push_values(chunk, |mut b, item| {
                b.push_bind(feed_id)
                    .push_bind(&item.title)
                    .push_bind(&item.link)
                    .push_bind(&item.description)
                    .push_bind(item.published_at)
                    .push_bind(now);
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted as usize)
    }

    /// All stored items of one feed, newest first.
    pub async fn get_items_for_feed(&self, feed_id: i64) -> Result<Vec<FeedItem>, DatabaseError> {
        let items = sqlx::query_as::<_, FeedItem>(&format!(
            "{ITEM_SELECT} WHERE i.feed_id = ?
             ORDER BY i.published_at IS NULL, i.published_at DESC, i.id DESC"
        ))
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// The newest items across every feed `user_id` follows.
    ///
    /// Items without a publication date sort after dated ones.
    pub async fn get_items_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<FeedItem>, DatabaseError> {
        let items = sqlx::query_as::<_, FeedItem>(&format!(
            "{ITEM_SELECT}
             INNER JOIN feed_follows ff ON ff.feed_id = i.feed_id
             WHERE ff.user_id = ?
             ORDER BY i.published_at IS NULL, i.published_at DESC, i.id DESC
             LIMIT ?"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
