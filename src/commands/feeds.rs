use std::fmt::Write;

use super::{expect_args, format_time, CommandError, CommandResult, State};
use crate::util::{strip_control_chars, truncate_chars, validate_url};

const DEFAULT_BROWSE_LIMIT: i64 = 2;

/// Longest description shown by `browse`
const DESCRIPTION_PREVIEW: usize = 200;

pub(super) async fn addfeed(state: &mut State, args: &[String]) -> CommandResult {
    let [name, url] = expect_args::<2>(args, "addfeed <name> <url>")?;
    let user = state.require_user().await?;
    let url = validate_url(url)?;

    let (feed, follow) = state.db.create_feed(user.id, name, url.as_str()).await?;
    tracing::info!(feed_id = feed.id, url = %feed.url, "Added feed");

    Ok(format!(
        "Feed added:\n  id:   {}\n  name: {}\n  url:  {}\n{} now follows {}",
        feed.id, feed.name, feed.url, follow.user_name, follow.feed_name
    ))
}

pub(super) async fn feeds(state: &mut State, args: &[String]) -> CommandResult {
    let [] = expect_args::<0>(args, "feeds")?;

    let mut out = String::new();
    for feed in state.db.list_feeds().await? {
        let _ = writeln!(
            out,
            "* {} ({}) added by {}",
            strip_control_chars(&feed.name),
            strip_control_chars(&feed.url),
            feed.user_name
        );
        match feed.last_fetched_at {
            Some(at) => {
                let _ = writeln!(out, "  last fetched: {}", format_time(at));
            }
            None => {
                let _ = writeln!(out, "  never fetched");
            }
        }
        if let Some(error) = feed.last_error {
            let _ = writeln!(out, "  last error: {}", strip_control_chars(&error));
        }
    }
    Ok(out.trim_end().to_owned())
}

/// Newest items from the current user's feeds: `browse [limit]`.
pub(super) async fn browse(state: &mut State, args: &[String]) -> CommandResult {
    let limit = match args {
        [] => DEFAULT_BROWSE_LIMIT,
        [limit] => limit
            .parse::<i64>()
            .ok()
            .filter(|l| *l > 0)
            .ok_or(CommandError::Usage("browse [limit]"))?,
        _ => return Err(CommandError::Usage("browse [limit]")),
    };
    let user = state.require_user().await?;

    let mut out = String::new();
    for item in state.db.get_items_for_user(user.id, limit).await? {
        let _ = writeln!(out, "{}", strip_control_chars(&item.title));
        let _ = writeln!(out, "  {}", strip_control_chars(&item.link));
        let published = item
            .published_at
            .map(format_time)
            .unwrap_or_else(|| "undated".to_string());
        let _ = writeln!(
            out,
            "  {} | {}",
            strip_control_chars(&item.feed_name),
            published
        );
        let description = strip_control_chars(&item.description);
        let description = description.trim();
        if !description.is_empty() {
            let _ = writeln!(
                out,
                "  {}",
                truncate_chars(description, DESCRIPTION_PREVIEW)
            );
        }
        out.push('\n');
    }
    Ok(out.trim_end().to_owned())
}
