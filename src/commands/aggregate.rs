use std::future::Future;
use std::time::Duration;

use anyhow::Context;

use super::{expect_args, CommandError, CommandResult, State};
use crate::config::Config;
use crate::feed::HttpFetcher;
use crate::scheduler::{parse_interval, retry_budget, Scheduler, SchedulerSettings};
use crate::storage::Database;

/// `agg <interval>`: fetch feeds until SIGINT/SIGTERM.
pub(super) async fn agg(state: &mut State, args: &[String]) -> CommandResult {
    let [interval] = expect_args::<1>(args, "agg <interval>")?;
    let interval = parse_interval(interval)?;

    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
    aggregate(&state.db, &state.config, interval, shutdown).await?;
    Ok(String::new())
}

/// Run the scheduler over `db` with fetch settings from `config` until
/// `shutdown` resolves.
///
/// Retries, if enabled, are capped below one `interval`.
pub async fn aggregate(
    db: &Database,
    config: &Config,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CommandError> {
    let fetcher = HttpFetcher::new(config.fetch_settings())
        .context("Failed to build HTTP client")?
        .with_retry_budget(retry_budget(interval));

    let settings = SchedulerSettings {
        interval,
        max_concurrent: config.max_concurrent_fetches.max(1),
    };

    Scheduler::new(db.clone(), fetcher, settings)
        .run(shutdown)
        .await
        .context("Feed collection stopped")?;
    Ok(())
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::debug!("Received SIGTERM"),
            _ = sigint.recv() => tracing::debug!("Received SIGINT"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
