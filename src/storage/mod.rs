mod feeds;
mod follows;
mod items;
mod schema;
mod types;
mod users;

pub use schema::Database;
pub use types::{
    DatabaseError, Feed, FeedFollow, FeedItem, FeedListing, NewFeedItem, User,
};
