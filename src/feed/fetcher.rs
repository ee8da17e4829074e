use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use super::rss::{parse_feed, ParseError, RssFeed};
use crate::scheduler::FeedFetcher;

/// Feeds are asked for as RSS first, generic XML after.
const ACCEPT: &str = "application/rss+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.1";

/// Errors that can occur during a single feed fetch.
///
/// All of them are transient from the scheduler's point of view: the feed is
/// retried on its next turn.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be decoded as RSS
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    /// Server returned 429 Too Many Requests after all retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Tunables for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Sent as `User-Agent` on every request
    pub user_agent: String,
    pub timeout: Duration,
    pub max_feed_bytes: usize,
    /// Extra attempts on 429, 5xx or truncated bodies. 0 disables retry.
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,
    /// Upper bound on time spent in one `fetch` including backoff. A retry
    /// whose delay would cross it is not attempted, and a retry in flight is
    /// cut off when it runs out.
    pub retry_budget: Option<Duration>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: "gator".to_string(),
            timeout: Duration::from_secs(30),
            max_feed_bytes: 10 * 1024 * 1024,
            max_retries: 0,
            retry_base_delay: Duration::from_secs(2),
            retry_budget: None,
        }
    }
}

/// Fetches RSS documents over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Cap the time one fetch may spend retrying.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.settings.retry_budget = Some(budget);
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// GET `url` and decode the body as RSS.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::RateLimited`] - 429 response after all retries
    /// - [`FetchError::ResponseTooLarge`] - Body over `max_feed_bytes`
    /// - [`FetchError::Parse`] - Malformed XML or not RSS
    pub async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(parse_feed(&bytes)?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let started = Instant::now();
        let mut retry_count = 0;
        let mut last_failure: Option<FetchError> = None;

        loop {
            let (limit, budget_bound) = self.attempt_timeout(retry_count, started);
            let failure = match tokio::time::timeout(limit, self.attempt(url, retry_count)).await {
                Ok(Ok(bytes)) => return Ok(bytes),
                Ok(Err(e)) if is_retryable(&e) => e,
                Ok(Err(e)) => return Err(e),
                // A retry cut off by the budget reports what it was retrying
                Err(_) => {
                    return Err(match last_failure {
                        Some(previous) if budget_bound => previous,
                        _ => FetchError::Timeout,
                    })
                }
            };

            let Some(delay) = self.next_delay(retry_count, started) else {
                return Err(failure);
            };

            tracing::warn!(
                url = %url,
                error = %failure,
                retry = retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                "Fetch failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
            retry_count += 1;
            last_failure = Some(failure);
        }
    }

    /// One GET including the body read.
    async fn attempt(&self, url: &str, retry_count: u32) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited(retry_count));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, self.settings.max_feed_bytes).await
    }

    /// Deadline for the next attempt, and whether the retry budget (rather
    /// than the request timeout) set it. Only retries count against the
    /// budget.
    fn attempt_timeout(&self, retry_count: u32, started: Instant) -> (Duration, bool) {
        let timeout = self.settings.timeout;
        match self.settings.retry_budget {
            Some(budget) if retry_count > 0 => {
                let remaining = budget.saturating_sub(started.elapsed());
                if remaining < timeout {
                    (remaining, true)
                } else {
                    (timeout, false)
                }
            }
            _ => (timeout, false),
        }
    }

    /// Backoff before the next attempt, or `None` when retries or the time
    /// budget are used up.
    fn next_delay(&self, retry_count: u32, started: Instant) -> Option<Duration> {
        if retry_count >= self.settings.max_retries {
            return None;
        }
        let delay = self
            .settings
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(retry_count));
        if let Some(budget) = self.settings.retry_budget {
            if started.elapsed() + delay >= budget {
                return None;
            }
        }
        Some(delay)
    }
}

/// 429, 5xx and truncated bodies are worth another attempt; other 4xx are not.
fn is_retryable(error: &FetchError) -> bool {
    match error {
        FetchError::RateLimited(_) | FetchError::IncompleteResponse { .. } => true,
        FetchError::HttpStatus(status) => *status >= 500,
        _ => false,
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
        HttpFetcher::fetch(self, url).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test</title>
    <item><title>One</title><link>https://example.com/1</link></item>
</channel></rss>"#;

    fn fast_settings(max_retries: u32) -> FetchSettings {
        FetchSettings {
            max_retries,
            retry_base_delay: Duration::from_millis(1),
            ..FetchSettings::default()
        }
    }

    fn fetcher(settings: FetchSettings) -> HttpFetcher {
        HttpFetcher::new(settings).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let feed = fetcher(FetchSettings::default())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.channel.title, "Test");
        assert_eq!(feed.channel.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("User-Agent", "gator"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetcher(FetchSettings::default())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = fetcher(fast_settings(3))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchSettings::default())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(4) // Initial request + 3 retries
            .mount(&mock_server)
            .await;

        let err = fetcher(fast_settings(3))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        // First two requests return 503, third succeeds
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let feed = fetcher(fast_settings(3))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.channel.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_rate_limited_after_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&mock_server)
            .await;

        let err = fetcher(fast_settings(2))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RateLimited(2)));
    }

    #[tokio::test]
    async fn test_retry_budget_stops_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(502))
            .expect(1)
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            max_retries: 5,
            retry_base_delay: Duration::from_secs(10),
            ..FetchSettings::default()
        };
        let err = fetcher(settings)
            .with_retry_budget(Duration::from_secs(5))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(502)));
    }

    #[tokio::test]
    async fn test_retry_budget_cuts_off_slow_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(1500)))
            .mount(&mock_server)
            .await;

        let started = std::time::Instant::now();
        let err = fetcher(fast_settings(3))
            .with_retry_budget(Duration::from_millis(300))
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::HttpStatus(503)));
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "fetch ran {:?} against a 300ms budget",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let err = fetcher(FetchSettings::default())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        match err {
            FetchError::Parse(_) => {}
            e => panic!("Expected Parse error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            max_feed_bytes: 16,
            ..FetchSettings::default()
        };
        let err = fetcher(settings)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            timeout: Duration::from_millis(100),
            ..FetchSettings::default()
        };
        let err = fetcher(settings)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        // Either our deadline or the client's own timeout fires first
        assert!(matches!(err, FetchError::Timeout | FetchError::Network(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let err = fetcher(FetchSettings::default())
            .fetch("http://127.0.0.1:1/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
