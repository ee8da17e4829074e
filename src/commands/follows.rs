use std::fmt::Write;

use super::{expect_args, CommandResult, State};
use crate::storage::Feed;
use crate::util::{strip_control_chars, validate_url};

/// Resolve a feed by URL, normalized the same way `addfeed` stores it.
async fn feed_by_url(state: &State, url: &str) -> Result<Feed, super::CommandError> {
    let url = validate_url(url)?;
    Ok(state.db.get_feed_by_url(url.as_str()).await?)
}

pub(super) async fn follow(state: &mut State, args: &[String]) -> CommandResult {
    let [url] = expect_args::<1>(args, "follow <url>")?;
    let user = state.require_user().await?;
    let feed = feed_by_url(state, url).await?;

    let follow = state.db.create_follow(user.id, feed.id).await?;
    Ok(format!("{} now follows {}", follow.user_name, follow.feed_name))
}

pub(super) async fn unfollow(state: &mut State, args: &[String]) -> CommandResult {
    let [url] = expect_args::<1>(args, "unfollow <url>")?;
    let user = state.require_user().await?;
    let feed = feed_by_url(state, url).await?;

    state.db.delete_follow(user.id, feed.id).await?;
    Ok(format!("{} unfollowed {}", user.name, feed.name))
}

pub(super) async fn following(state: &mut State, args: &[String]) -> CommandResult {
    let [] = expect_args::<0>(args, "following")?;
    let user = state.require_user().await?;

    let mut out = String::new();
    for follow in state.db.list_follows_for_user(user.id).await? {
        let _ = writeln!(out, "* {}", strip_control_chars(&follow.feed_name));
    }
    Ok(out.trim_end().to_owned())
}
