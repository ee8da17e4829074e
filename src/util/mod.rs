//! Utility functions for common operations.
//!
//! - **URL validation**: only http(s) URLs with a host can be added as feeds
//! - **Text processing**: control-character stripping for untrusted feed text,
//!   name sanitizing, and character-based truncation for terminal output
//!
//! # Examples
//!
//! ```
//! use gator::util::{sanitize_name, strip_control_chars, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! assert_eq!(strip_control_chars("\x1b[1mBold\x1b[0m"), "Bold");
//! assert_eq!(sanitize_name("  alice ").as_deref(), Some("alice"));
//! ```

mod text;
mod url_validator;

pub use text::{sanitize_name, strip_control_chars, truncate_chars};
pub use url_validator::{validate_url, UrlValidationError};
