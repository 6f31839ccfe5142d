use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Browser-like user agent; the site serves a reduced page to unknown clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl FetchError {
    /// Transport failures, rate limiting (429) and server errors (5xx) are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::RetriesExhausted { .. } => false,
        }
    }

    /// The page is gone (deleted or never existed).
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404 | 410, .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Anything that can turn a URL into an HTML document.
///
/// The scrape loop only talks to this trait, so the HTTP client can be
/// replaced (or faked in tests) without touching aggregation.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Exponential backoff settings for a single URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per URL, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub initial_delay: Duration,
    /// Upper bound of the random jitter added to every backoff delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    ///
    /// A server-supplied `Retry-After` wins when it asks for longer.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32 << attempt.min(16);
        let computed = self.initial_delay.saturating_mul(factor) + random_up_to(self.max_jitter);
        match retry_after {
            Some(server) if server > computed => server,
            _ => computed,
        }
    }
}

/// Random pause after every successful request to stay polite to the site.
#[derive(Debug, Clone, PartialEq)]
pub struct PoliteDelay {
    pub min: Duration,
    pub max: Duration,
}

impl Default for PoliteDelay {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(1),
            max: Duration::from_secs(3),
        }
    }
}

impl PoliteDelay {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        self.min + random_up_to(self.max - self.min)
    }
}

fn random_up_to(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let secs = rand::rng().random_range(0.0..max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up.
pub async fn with_retries<F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut attempt: F,
) -> Result<String, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut tried = 0;

    loop {
        let err = match attempt().await {
            Ok(body) => return Ok(body),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };
        tried += 1;

        if tried >= max_attempts {
            tracing::error!(url = %url, attempts = tried, error = %err, "Request failed, no attempts left");
            return Err(FetchError::RetriesExhausted {
                url: url.to_string(),
                attempts: tried,
                last_error: err.to_string(),
            });
        }

        let delay = policy.backoff_delay(tried - 1, err.retry_after());
        tracing::warn!(
            url = %url,
            attempt = tried,
            delay = format!("{:.2}s", delay.as_secs_f64()),
            error = %err,
            "Request failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// `PageFetcher` backed by reqwest, with backoff and a polite delay.
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    polite: PoliteDelay,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy, polite: PoliteDelay) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            policy,
            polite,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        let transport = |e: reqwest::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        response.text().await.map_err(transport)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!(url = %url, "GET");
        let body = with_retries(&self.policy, url, || self.fetch_once(url)).await?;
        tracing::debug!(url = %url, bytes = body.len(), "Received HTML");

        let pause = self.polite.sample();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(body)
    }
}
