//! Feed retrieval: HTTP fetching and RSS 2.0 decoding.
//!
//! - [`rss`] - Decodes an RSS body into a normalized [`RssFeed`], unescaping
//!   HTML entities in every text field
//! - [`fetcher`] - [`HttpFetcher`], a pooled `reqwest` client with a body
//!   size cap and optional bounded retry
//!
//! # Example
//!
//! ```
//! use gator::feed::parse_feed;
//!
//! let feed = parse_feed(b"<channel><title>Caf&amp;eacute;</title></channel>").unwrap();
//! assert_eq!(feed.channel.title, "Café");
//! ```

pub mod fetcher;
pub mod rss;

pub use fetcher::{FetchError, FetchSettings, HttpFetcher};
pub use rss::{parse_feed, Channel, ParseError, ParseResult, RssFeed, RssItem};
