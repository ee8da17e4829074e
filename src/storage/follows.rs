use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, FeedFollow};

const FOLLOW_SELECT: &str = r#"
    SELECT ff.id, ff.user_id, ff.feed_id, ff.created_at, ff.updated_at,
           f.name AS feed_name, u.name AS user_name
    FROM feed_follows ff
    INNER JOIN feeds f ON f.id = ff.feed_id
    INNER JOIN users u ON u.id = ff.user_id
"#;

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Subscribe `user_id` to `feed_id`.
    ///
    /// Returns [`DatabaseError::DuplicateFollow`] if the pair already exists;
    /// nothing is written in that case.
    pub async fn create_follow(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<FeedFollow, DatabaseError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let feed: Option<(String,)> = sqlx::query_as("SELECT name FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&mut *tx)
            .await?;
        let (feed_name,) = feed.ok_or_else(|| DatabaseError::FeedNotFound(format!("#{feed_id}")))?;

        let follow = Self::insert_follow(&mut tx, user_id, feed_id, &feed_name, now).await?;
        tx.commit().await?;
        Ok(follow)
    }

    /// Insert a follow row on an open connection and read it back with names.
    pub(crate) async fn insert_follow(
        conn: &mut SqliteConnection,
        user_id: i64,
        feed_id: i64,
        feed_name: &str,
        now: i64,
    ) -> Result<FeedFollow, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::DuplicateFollow(feed_name.to_owned())
            } else {
                DatabaseError::from_sqlx(e)
            }
        })?;

        let follow = sqlx::query_as::<_, FeedFollow>(&format!("{FOLLOW_SELECT} WHERE ff.id = ?"))
            .bind(id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(follow)
    }

    /// Remove the subscription of `user_id` to `feed_id`.
    ///
    /// Exactly one row is affected on success. Unfollowing a feed the user
    /// does not follow is reported as [`DatabaseError::FollowNotFound`].
    pub async fn delete_follow(&self, user_id: i64, feed_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::FollowNotFound(format!("#{feed_id}")));
        }
        Ok(())
    }

    /// A user's subscriptions, oldest first.
    pub async fn list_follows_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<FeedFollow>, DatabaseError> {
        let follows = sqlx::query_as::<_, FeedFollow>(&format!(
            "{FOLLOW_SELECT} WHERE ff.user_id = ? ORDER BY ff.created_at, ff.id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }
}
