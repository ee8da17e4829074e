//! Command dispatch.
//!
//! A [`Registry`] maps command names to handlers. It is built once at startup
//! and handed, together with the [`State`] the handlers operate on, to the
//! single top-level boundary in `main`. Handlers never exit the process: they
//! return their output as text, or a [`CommandError`] that `main` turns into
//! an exit code.

mod aggregate;
mod feeds;
mod follows;
mod users;

use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::scheduler::IntervalError;
use crate::storage::{Database, DatabaseError, User};
use crate::util::UrlValidationError;

pub use aggregate::aggregate;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not logged in (run `register <name>` or `login <name>` first)")]
    NotLoggedIn,

    #[error("invalid interval: {0}")]
    Interval(#[from] IntervalError),

    #[error("invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Text a command prints on success.
pub type CommandResult = Result<String, CommandError>;

/// Everything a handler may touch.
pub struct State {
    pub db: Database,
    pub config: Config,
    /// Where `config` is saved back to when the current user changes
    pub config_path: PathBuf,
}

impl State {
    pub fn new(db: Database, config: Config, config_path: PathBuf) -> Self {
        Self {
            db,
            config,
            config_path,
        }
    }

    /// The logged-in user, as stored in the database.
    pub async fn require_user(&self) -> Result<User, CommandError> {
        let name = self
            .config
            .current_user_name
            .as_deref()
            .ok_or(CommandError::NotLoggedIn)?;
        Ok(self.db.get_user(name).await?)
    }

    /// Persist `name` as the current user.
    pub(crate) fn set_current_user(&mut self, name: &str) -> Result<(), CommandError> {
        self.config.current_user_name = Some(name.to_owned());
        self.config.save(&self.config_path)?;
        Ok(())
    }
}

pub type Handler = for<'a> fn(&'a mut State, &'a [String]) -> BoxFuture<'a, CommandResult>;

/// Command name → handler table.
#[derive(Default)]
pub struct Registry {
    handlers: BTreeMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in command.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("register", |s, a| Box::pin(users::register(s, a)));
        registry.register("login", |s, a| Box::pin(users::login(s, a)));
        registry.register("users", |s, a| Box::pin(users::users(s, a)));
        registry.register("reset", |s, a| Box::pin(users::reset(s, a)));
        registry.register("addfeed", |s, a| Box::pin(feeds::addfeed(s, a)));
        registry.register("feeds", |s, a| Box::pin(feeds::feeds(s, a)));
        registry.register("browse", |s, a| Box::pin(feeds::browse(s, a)));
        registry.register("follow", |s, a| Box::pin(follows::follow(s, a)));
        registry.register("unfollow", |s, a| Box::pin(follows::unfollow(s, a)));
        registry.register("following", |s, a| Box::pin(follows::following(s, a)));
        registry.register("agg", |s, a| Box::pin(aggregate::agg(s, a)));
        registry
    }

    /// Add or replace a handler.
    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Dispatch `name` with `args`.
    pub async fn run(&self, state: &mut State, name: &str, args: &[String]) -> CommandResult {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))?;
        tracing::debug!(command = name, args = args.len(), "Running command");
        handler(state, args).await
    }
}

/// Unix millis as `2024-01-01 12:00 UTC`.
pub(crate) fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Take exactly `N` arguments.
pub(crate) fn expect_args<'a, const N: usize>(
    args: &'a [String],
    usage: &'static str,
) -> Result<[&'a str; N], CommandError> {
    if args.len() != N {
        return Err(CommandError::Usage(usage));
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}
