//! gator: a command-line RSS aggregator.
//!
//! Users register, add and follow RSS feeds, and `agg` runs a loop that
//! fetches the least recently fetched feed on every tick and stores its new
//! items.
//!
//! - [`scheduler`] - The tick loop and its selection policy
//! - [`feed`] - HTTP fetching and RSS decoding
//! - [`storage`] - SQLite persistence for users, feeds, follows and items
//! - [`commands`] - The command registry used by the binary
//! - [`config`] - `~/.config/gator/config.toml`

pub mod commands;
pub mod config;
pub mod feed;
pub mod scheduler;
pub mod storage;
pub mod util;
