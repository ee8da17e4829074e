//! The aggregation loop.
//!
//! On every tick the [`Scheduler`] claims the feed that has waited longest
//! since its last fetch, marks it fetched, downloads and decodes it, and hands
//! the items to the [`ItemSink`]. A failed fetch is logged and recorded on the
//! feed; the feed simply comes round again on a later tick.
//!
//! Storage and HTTP sit behind [`FeedQueue`], [`ItemSink`] and [`FeedFetcher`]
//! so the loop can run against SQLite or an in-memory fake.

mod interval;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::feed::{FetchError, RssFeed};
use crate::storage::{Database, DatabaseError, Feed, NewFeedItem};
use crate::util::truncate_chars;

pub use interval::{parse_interval, IntervalError};

/// Consecutive ticks with a failing store before [`Scheduler::run`] gives up.
pub const MAX_STORE_FAILURES: u32 = 5;

/// Longest error message stored on a feed
const MAX_ERROR_LEN: usize = 500;

// ============================================================================
// Collaborators
// ============================================================================

/// Source of feeds to fetch, in scheduling order.
#[async_trait]
pub trait FeedQueue: Send + Sync {
    /// The feed with the oldest `last_fetched_at`, never-fetched feeds first.
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError>;

    /// Record a fetch attempt at `at` (Unix millis).
    async fn mark_fetched(&self, feed_id: i64, at: i64) -> Result<(), DatabaseError>;

    /// Select the next feed and mark it fetched.
    ///
    /// Stores that can do both in one atomic step should override this.
    async fn claim_next_feed(&self, at: i64) -> Result<Option<Feed>, DatabaseError> {
        let Some(mut feed) = self.next_feed_to_fetch().await? else {
            return Ok(None);
        };
        self.mark_fetched(feed.id, at).await?;
        feed.last_fetched_at = Some(at);
        Ok(Some(feed))
    }

    /// Set (`Some`) or clear (`None`) the last fetch error of a feed.
    async fn record_fetch_error(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;
}

/// Destination for fetched items. Duplicates must be ignored, not rejected.
#[async_trait]
pub trait ItemSink: Send + Sync {
    /// Returns how many of `items` were new.
    async fn save_items(&self, feed_id: i64, items: &[NewFeedItem])
        -> Result<usize, DatabaseError>;
}

/// Downloads and decodes one feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError>;
}

#[async_trait]
impl FeedQueue for Database {
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        Database::next_feed_to_fetch(self).await
    }

    async fn mark_fetched(&self, feed_id: i64, at: i64) -> Result<(), DatabaseError> {
        Database::mark_fetched(self, feed_id, at).await
    }

    async fn claim_next_feed(&self, at: i64) -> Result<Option<Feed>, DatabaseError> {
        Database::claim_next_feed(self, at).await
    }

    async fn record_fetch_error(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        Database::set_feed_error(self, feed_id, error).await
    }
}

#[async_trait]
impl ItemSink for Database {
    async fn save_items(
        &self,
        feed_id: i64,
        items: &[NewFeedItem],
    ) -> Result<usize, DatabaseError> {
        Database::save_items(self, feed_id, items).await
    }
}

#[async_trait]
impl<T: FeedQueue + ?Sized> FeedQueue for Arc<T> {
    async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        (**self).next_feed_to_fetch().await
    }

    async fn mark_fetched(&self, feed_id: i64, at: i64) -> Result<(), DatabaseError> {
        (**self).mark_fetched(feed_id, at).await
    }

    async fn claim_next_feed(&self, at: i64) -> Result<Option<Feed>, DatabaseError> {
        (**self).claim_next_feed(at).await
    }

    async fn record_fetch_error(
        &self,
        feed_id: i64,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        (**self).record_fetch_error(feed_id, error).await
    }
}

#[async_trait]
impl<T: ItemSink + ?Sized> ItemSink for Arc<T> {
    async fn save_items(
        &self,
        feed_id: i64,
        items: &[NewFeedItem],
    ) -> Result<usize, DatabaseError> {
        (**self).save_items(feed_id, items).await
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store unavailable for {failures} consecutive ticks: {source}")]
    StoreUnavailable {
        failures: u32,
        #[source]
        source: DatabaseError,
    },
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    /// Feeds claimed and fetched per tick. 1 is strictly sequential.
    pub max_concurrent: usize,
}

impl SchedulerSettings {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_concurrent: 1,
        }
    }
}

/// Time a single fetch may spend retrying, kept under one tick so backoff
/// never holds the timer past the next boundary.
pub fn retry_budget(interval: Duration) -> Duration {
    interval.mul_f64(0.8)
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Feeds claimed (and marked fetched) this tick
    pub claimed: usize,
    pub fetched: usize,
    pub failed: usize,
    pub new_items: usize,
}

enum FeedOutcome {
    Fetched { new_items: usize },
    Failed,
}

pub struct Scheduler<S, F> {
    store: S,
    fetcher: F,
    settings: SchedulerSettings,
    last_mark: AtomicI64,
}

impl<S, F> Scheduler<S, F>
where
    S: FeedQueue + ItemSink,
    F: FeedFetcher,
{
    pub fn new(store: S, fetcher: F, settings: SchedulerSettings) -> Self {
        Self {
            store,
            fetcher,
            settings,
            last_mark: AtomicI64::new(0),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Tick on a fixed cadence until `shutdown` resolves.
    ///
    /// The first tick fires immediately. A tick slower than the interval makes
    /// the next one start right after it, without catching up on missed
    /// ticks. Fetch failures never stop the loop; only a store that keeps
    /// failing does.
    ///
    /// When `shutdown` resolves mid-tick the in-flight fetch is dropped.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::StoreUnavailable`] after [`MAX_STORE_FAILURES`]
    /// consecutive ticks whose store access failed.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), SchedulerError> {
        tokio::pin!(shutdown);

        let mut timer = tokio::time::interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut store_failures = 0;

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            max_concurrent = self.settings.max_concurrent,
            "Collecting feeds"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = timer.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = self.tick() => result,
            };

            match result {
                Ok(_) => store_failures = 0,
                Err(e) => {
                    store_failures += 1;
                    tracing::error!(
                        error = %e,
                        failures = store_failures,
                        "Store access failed during tick"
                    );
                    if store_failures >= MAX_STORE_FAILURES {
                        return Err(SchedulerError::StoreUnavailable {
                            failures: store_failures,
                            source: e,
                        });
                    }
                }
            }
        }

        tracing::info!("Shutdown requested, scheduler stopped");
        Ok(())
    }

    /// Claim up to `max_concurrent` feeds, then fetch and store each.
    ///
    /// Every claimed feed is marked fetched before its request is sent. An
    /// empty store is a no-op.
    ///
    /// # Errors
    ///
    /// Only store failures are returned; fetch failures are logged, recorded
    /// on the feed and counted in the report.
    pub async fn tick(&self) -> Result<TickReport, DatabaseError> {
        let limit = self.settings.max_concurrent.max(1);
        let mut claimed: Vec<Feed> = Vec::with_capacity(limit);

        let mut claim_error = None;

        while claimed.len() < limit {
            let feed = match self.store.claim_next_feed(self.mark_time()).await {
                Ok(Some(feed)) => feed,
                Ok(None) => break,
                Err(e) if claimed.is_empty() => return Err(e),
                // Already-claimed feeds are marked; fetch them before reporting
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        claimed = ?claimed.iter().map(|f| f.id).collect::<Vec<_>>(),
                        "Claim failed, fetching feeds already claimed"
                    );
                    claim_error = Some(e);
                    break;
                }
            };
            // Fewer feeds than slots: the queue wrapped around
            if claimed.iter().any(|f| f.id == feed.id) {
                break;
            }
            claimed.push(feed);
        }

        let mut report = TickReport {
            claimed: claimed.len(),
            ..TickReport::default()
        };
        if claimed.is_empty() {
            tracing::debug!("No feeds to fetch");
            return Ok(report);
        }

        let results: Vec<Result<FeedOutcome, DatabaseError>> = stream::iter(claimed)
            .map(|feed| self.process(feed))
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut first_error = claim_error;
        for result in results {
            match result {
                Ok(FeedOutcome::Fetched { new_items }) => {
                    report.fetched += 1;
                    report.new_items += new_items;
                }
                Ok(FeedOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process(&self, feed: Feed) -> Result<FeedOutcome, DatabaseError> {
        match self.fetcher.fetch(&feed.url).await {
            Ok(document) => {
                let parsed = document.new_items();
                if parsed.skipped > 0 {
                    tracing::debug!(
                        feed_id = feed.id,
                        skipped = parsed.skipped,
                        "Skipped items without a link"
                    );
                }

                let new_items = self.store.save_items(feed.id, &parsed.items).await?;
                if feed.last_error.is_some() {
                    self.store.record_fetch_error(feed.id, None).await?;
                }

                tracing::info!(
                    feed_id = feed.id,
                    feed = %feed.name,
                    items = parsed.items.len(),
                    new_items,
                    "Fetched feed"
                );
                Ok(FeedOutcome::Fetched { new_items })
            }
            Err(e) => {
                tracing::warn!(
                    feed_id = feed.id,
                    url = %feed.url,
                    error = %e,
                    "Failed to fetch feed"
                );
                let message = e.to_string();
                self.store
                    .record_fetch_error(feed.id, Some(&truncate_chars(&message, MAX_ERROR_LEN)))
                    .await?;
                Ok(FeedOutcome::Failed)
            }
        }
    }

    /// Current time in millis, strictly after any mark this scheduler made
    /// before, so feeds marked within the same millisecond still rotate.
    fn mark_time(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let prev = self
            .last_mark
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or_else(|prev| prev);
        now.max(prev + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Channel, RssItem};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    // ========================================================================
    // In-memory collaborators
    // ========================================================================

    #[derive(Default)]
    struct MemoryStore {
        feeds: Mutex<Vec<Feed>>,
        items: Mutex<HashSet<(i64, String)>>,
        failing: Mutex<bool>,
        /// Selections allowed before the next one fails once
        selections_before_failure: Mutex<Option<usize>>,
    }

    impl MemoryStore {
        fn with_feeds(feeds: &[(&str, Option<i64>)]) -> Arc<Self> {
            let store = Self::default();
            {
                let mut guard = store.feeds.lock().unwrap();
                for (i, (name, last_fetched_at)) in feeds.iter().enumerate() {
                    guard.push(Feed {
                        id: i as i64 + 1,
                        name: name.to_string(),
                        url: format!("https://{}.example.com/rss", name),
                        user_id: 1,
                        created_at: 0,
                        updated_at: 0,
                        last_fetched_at: *last_fetched_at,
                        last_error: None,
                    });
                }
            }
            Arc::new(store)
        }

        fn feed(&self, name: &str) -> Feed {
            self.feeds
                .lock()
                .unwrap()
                .iter()
                .find(|f| f.name == name)
                .cloned()
                .unwrap()
        }

        fn set_failing(&self, failing: bool) {
            *self.failing.lock().unwrap() = failing;
        }

        fn fail_selection_after(&self, selections: usize) {
            *self.selections_before_failure.lock().unwrap() = Some(selections);
        }

        fn check(&self) -> Result<(), DatabaseError> {
            if *self.failing.lock().unwrap() {
                Err(DatabaseError::Other(sqlx::Error::PoolTimedOut))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl FeedQueue for MemoryStore {
        async fn next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
            self.check()?;
            {
                let mut remaining = self.selections_before_failure.lock().unwrap();
                match remaining.as_mut() {
                    Some(0) => {
                        *remaining = None;
                        return Err(DatabaseError::Other(sqlx::Error::PoolTimedOut));
                    }
                    Some(n) => *n -= 1,
                    None => {}
                }
            }
            let feeds = self.feeds.lock().unwrap();
            // None < Some(_) gives nulls-first ordering
            Ok(feeds
                .iter()
                .min_by_key(|f| (f.last_fetched_at, f.id))
                .cloned())
        }

        async fn mark_fetched(&self, feed_id: i64, at: i64) -> Result<(), DatabaseError> {
            self.check()?;
            let mut feeds = self.feeds.lock().unwrap();
            if let Some(feed) = feeds.iter_mut().find(|f| f.id == feed_id) {
                feed.last_fetched_at = Some(at);
            }
            Ok(())
        }

        async fn record_fetch_error(
            &self,
            feed_id: i64,
            error: Option<&str>,
        ) -> Result<(), DatabaseError> {
            self.check()?;
            let mut feeds = self.feeds.lock().unwrap();
            if let Some(feed) = feeds.iter_mut().find(|f| f.id == feed_id) {
                feed.last_error = error.map(str::to_owned);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ItemSink for MemoryStore {
        async fn save_items(
            &self,
            feed_id: i64,
            items: &[NewFeedItem],
        ) -> Result<usize, DatabaseError> {
            self.check()?;
            let mut stored = self.items.lock().unwrap();
            Ok(items
                .iter()
                .filter(|item| stored.insert((feed_id, item.link.clone())))
                .count())
        }
    }

    /// Serves one fixed item per feed; records each request along with the
    /// feed's `last_fetched_at` at the moment the request was made.
    struct FakeFetcher {
        store: Arc<MemoryStore>,
        failing_urls: HashSet<String>,
        delay: Duration,
        calls: Mutex<Vec<(String, Option<i64>)>>,
    }

    impl FakeFetcher {
        fn new(store: &Arc<MemoryStore>) -> Self {
            Self {
                store: Arc::clone(store),
                failing_urls: HashSet::new(),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, url: &str) -> Self {
            self.failing_urls.insert(url.to_string());
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn fetched_hosts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(url, _)| {
                    let host = url.trim_start_matches("https://");
                    host.split('.').next().unwrap().to_string()
                })
                .collect()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl FeedFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
            let marked = self
                .store
                .feeds
                .lock()
                .unwrap()
                .iter()
                .find(|f| f.url == url)
                .and_then(|f| f.last_fetched_at);
            self.calls.lock().unwrap().push((url.to_string(), marked));

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing_urls.contains(url) {
                return Err(FetchError::HttpStatus(500));
            }
            Ok(RssFeed {
                channel: Channel {
                    title: url.to_string(),
                    items: vec![
                        RssItem {
                            title: "Post".to_string(),
                            link: format!("{}/post", url),
                            ..Default::default()
                        },
                        RssItem {
                            title: "No link".to_string(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
            })
        }
    }

    const JAN_1: i64 = 1_704_067_200_000;
    const JAN_2: i64 = 1_704_153_600_000;

    fn scheduler(
        store: &Arc<MemoryStore>,
        fetcher: FakeFetcher,
        max_concurrent: usize,
    ) -> Scheduler<Arc<MemoryStore>, FakeFetcher> {
        Scheduler::new(
            Arc::clone(store),
            fetcher,
            SchedulerSettings {
                interval: Duration::from_secs(10),
                max_concurrent,
            },
        )
    }

    // ========================================================================
    // tick
    // ========================================================================

    #[tokio::test]
    async fn test_tick_on_empty_store_is_noop() {
        let store = MemoryStore::with_feeds(&[]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        let report = sched.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert_eq!(sched.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ticks_follow_least_recently_fetched_order() {
        let store =
            MemoryStore::with_feeds(&[("a", Some(JAN_1)), ("b", None), ("c", Some(JAN_2))]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        for _ in 0..6 {
            sched.tick().await.unwrap();
        }
        assert_eq!(sched.fetcher.fetched_hosts(), vec!["b", "a", "c", "b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_feed_is_marked_before_fetch() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        sched.tick().await.unwrap();

        let calls = sched.fetcher.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.is_some(), "feed was not marked when fetched");
        assert_eq!(calls[0].1, store.feed("a").last_fetched_at);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded_and_loop_continues() {
        let store = MemoryStore::with_feeds(&[("a", None), ("b", Some(JAN_1))]);
        let fetcher = FakeFetcher::new(&store).failing("https://a.example.com/rss");
        let sched = scheduler(&store, fetcher, 1);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.fetched, 0);
        assert!(store.feed("a").last_error.unwrap().contains("500"));

        let report = sched.tick().await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(sched.fetcher.fetched_hosts(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        store.feeds.lock().unwrap()[0].last_error = Some("HTTP error: status 503".to_string());
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        sched.tick().await.unwrap();
        assert_eq!(store.feed("a").last_error, None);
    }

    #[tokio::test]
    async fn test_ingestion_is_idempotent() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        let first = sched.tick().await.unwrap();
        let second = sched.tick().await.unwrap();
        // The linkless item is skipped both times
        assert_eq!(first.new_items, 1);
        assert_eq!(second.new_items, 0);
        assert_eq!(store.items.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_tick_claims_distinct_feeds() {
        let store = MemoryStore::with_feeds(&[("a", None), ("b", None), ("c", None), ("d", None)]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 3);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.fetched, 3);

        let mut hosts = sched.fetcher.fetched_hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["a", "b", "c"]);

        sched.tick().await.unwrap();
        assert_eq!(sched.fetcher.fetched_hosts().len(), 6);
        assert!(sched.fetcher.fetched_hosts()[3..].contains(&"d".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_tick_with_fewer_feeds_than_slots() {
        let store = MemoryStore::with_feeds(&[("a", None), ("b", None)]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 5);

        let report = sched.tick().await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(sched.fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        store.set_failing(true);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        assert!(sched.tick().await.is_err());
        assert_eq!(sched.fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_failure_still_fetches_claimed_feeds() {
        let store = MemoryStore::with_feeds(&[("a", None), ("b", None), ("c", None)]);
        store.fail_selection_after(2);
        let sched = scheduler(&store, FakeFetcher::new(&store), 3);

        assert!(sched.tick().await.is_err());

        let mut hosts = sched.fetcher.fetched_hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["a", "b"]);
        assert_eq!(store.items.lock().unwrap().len(), 2);
        assert_eq!(store.feed("c").last_fetched_at, None);
    }

    #[test]
    fn test_mark_time_strictly_increases() {
        let store = MemoryStore::with_feeds(&[]);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);
        let marks: Vec<i64> = (0..100).map(|_| sched.mark_time()).collect();
        assert!(marks.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_retry_budget_below_interval() {
        let interval = Duration::from_secs(60);
        assert!(retry_budget(interval) < interval);
    }

    // ========================================================================
    // run
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_on_interval_until_shutdown() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let sched = Arc::new(scheduler(&store, FakeFetcher::new(&store), 1));
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let sched = Arc::clone(&sched);
            async move {
                sched
                    .run(async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        // Ticks at 0s, 10s and 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(sched.fetcher.call_count(), 3);

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_delays_next_tick_without_stacking() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let fetcher = FakeFetcher::new(&store).with_delay(Duration::from_secs(15));
        let sched = Arc::new(scheduler(&store, fetcher, 1));
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let sched = Arc::clone(&sched);
            async move {
                sched
                    .run(async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        // Fetches start at 0s and 15s; the one at 15s is still running
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(sched.fetcher.call_count(), 2);

        tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_fetch() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let fetcher = FakeFetcher::new(&store).with_delay(Duration::from_secs(3600));
        let sched = scheduler(&store, fetcher, 1);

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            sched.run(tokio::time::sleep(Duration::from_secs(5))),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
        assert_eq!(sched.fetcher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_consecutive_store_failures() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        store.set_failing(true);
        let sched = scheduler(&store, FakeFetcher::new(&store), 1);

        let err = sched.run(std::future::pending()).await.unwrap_err();
        match err {
            SchedulerError::StoreUnavailable { failures, .. } => {
                assert_eq!(failures, MAX_STORE_FAILURES)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failures_never_stop_run() {
        let store = MemoryStore::with_feeds(&[("a", None)]);
        let fetcher = FakeFetcher::new(&store).failing("https://a.example.com/rss");
        let sched = scheduler(&store, fetcher, 1);

        let result = sched
            .run(tokio::time::sleep(Duration::from_secs(105)))
            .await;
        assert!(result.is_ok());
        assert_eq!(sched.fetcher.call_count(), 11);
    }
}
