use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, User};
use crate::util::sanitize_name;

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a new user.
    ///
    /// The name is sanitized (control chars stripped, whitespace trimmed).
    /// Returns [`DatabaseError::UserExists`] if the name is taken.
    pub async fn create_user(&self, name: &str) -> Result<User, DatabaseError> {
        let name = sanitize_name(name).ok_or(DatabaseError::EmptyName)?;
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING id, name, created_at, updated_at
        "#,
        )
        .bind(&name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::UserExists(name.clone())
            } else {
                DatabaseError::from_sqlx(e)
            }
        })
    }

    /// Look up a user by name, sanitized the same way as in [`create_user`].
    ///
    /// [`create_user`]: Database::create_user
    pub async fn get_user(&self, name: &str) -> Result<User, DatabaseError> {
        let name =
            sanitize_name(name).ok_or_else(|| DatabaseError::UserNotFound(name.to_owned()))?;
        sqlx::query_as::<_, User>(
            "SELECT id, name, created_at, updated_at FROM users WHERE name = ?",
        )
        .bind(&name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::UserNotFound(name.clone()))
    }

    /// All user names in registration order.
    pub async fn list_users(&self) -> Result<Vec<String>, DatabaseError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Delete every user. Feeds, follows and items cascade.
    ///
    /// Returns the number of users removed.
    pub async fn reset(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
