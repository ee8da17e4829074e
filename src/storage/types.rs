use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The database is locked by another gator process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Name was empty after stripping control characters and whitespace
    #[error("Name cannot be empty or whitespace-only")]
    EmptyName,

    #[error("User [{0}] already exists, register with a different username")]
    UserExists(String),

    #[error("User [{0}] doesn't exist, register the username first")]
    UserNotFound(String),

    #[error("A feed with URL {0} already exists")]
    FeedExists(String),

    #[error("No feed found with URL {0}")]
    FeedNotFound(String),

    /// The (user, feed) pair is already present in `feed_follows`
    #[error("Already following {0}")]
    DuplicateFollow(String),

    #[error("Not following {0}")]
    FollowNotFound(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// True when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered user. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A subscribable RSS source.
///
/// `last_fetched_at` is the scheduling key: `None` means the feed has never
/// been fetched and sorts ahead of every fetched feed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
    /// Message of the most recent failed fetch, cleared on success
    pub last_error: Option<String>,
}

/// Feed row joined with the name of the user who added it
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedListing {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_name: String,
    pub last_fetched_at: Option<i64>,
    pub last_error: Option<String>,
}

/// A user's subscription to a feed. Unique per (user_id, feed_id).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub feed_name: String,
    pub user_name: String,
}

/// A normalized item ready to be stored, keyed by `link` within its feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<i64>,
}

/// A stored feed item
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedItem {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<i64>,
    pub created_at: i64,
    /// Name of the owning feed (populated by joined queries)
    pub feed_name: String,
}
