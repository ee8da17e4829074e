use std::fmt::Write;

use super::{expect_args, CommandResult, State};

pub(super) async fn register(state: &mut State, args: &[String]) -> CommandResult {
    let [name] = expect_args::<1>(args, "register <name>")?;
    let user = state.db.create_user(name).await?;
    state.set_current_user(&user.name)?;
    tracing::info!(user_id = user.id, user = %user.name, "Registered user");
    Ok(format!("User {} created and logged in", user.name))
}

pub(super) async fn login(state: &mut State, args: &[String]) -> CommandResult {
    let [name] = expect_args::<1>(args, "login <name>")?;
    let user = state.db.get_user(name).await?;
    state.set_current_user(&user.name)?;
    Ok(format!("User set to {}", user.name))
}

pub(super) async fn users(state: &mut State, args: &[String]) -> CommandResult {
    let [] = expect_args::<0>(args, "users")?;
    let current = state.config.current_user_name.as_deref();

    let mut out = String::new();
    for name in state.db.list_users().await? {
        if Some(name.as_str()) == current {
            let _ = writeln!(out, "* {} (current)", name);
        } else {
            let _ = writeln!(out, "* {}", name);
        }
    }
    Ok(out.trim_end().to_owned())
}

/// Delete every user, and with them their feeds, follows and items.
pub(super) async fn reset(state: &mut State, args: &[String]) -> CommandResult {
    let [] = expect_args::<0>(args, "reset")?;
    let deleted = state.db.reset().await?;
    tracing::info!(users = deleted, "Database reset");
    Ok(format!("Database reset: {} users deleted", deleted))
}
