//! Shared HTTP plumbing for every upstream provider: a per-provider throttle
//! and rate-limit aware JSON fetches.

use crate::error::{FetchError, FetchResult};
use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; token-enricher)";

static BAN_UNTIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"until\s+(\d+)").unwrap());

pub fn build_client(timeout: Duration) -> FetchResult<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .pool_max_idle_per_host(8)
        .build()?)
}

/// Enforces a minimum spacing between consecutive calls to one provider.
/// Shared by every token in the run.
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// How many times a rate-limited request is re-sent before giving up.
    pub max_rate_limit_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(client: Client, min_interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(min_interval),
            policy,
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &HeaderMap,
    ) -> FetchResult<T> {
        let body = self.get_text(url, query, headers).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Rate-limited responses (429/418) are retried on the same request after
    /// a delay; any other non-2xx status fails immediately.
    pub async fn get_text(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: &HeaderMap,
    ) -> FetchResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.acquire().await;
            debug!(url, attempt, "GET");

            let response = self
                .client
                .get(url)
                .query(query)
                .headers(headers.clone())
                .send()
                .await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
                let retry_after = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                if attempt > self.policy.max_rate_limit_retries {
                    return Err(FetchError::RateLimited {
                        url: url.to_string(),
                        attempts: attempt,
                    });
                }
                let wait = retry_after
                    .or_else(|| ban_until(&body))
                    .unwrap_or(self.policy.backoff * attempt);
                warn!(url, status = status.as_u16(), wait_ms = wait.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            return Ok(response.text().await?);
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Binance-style bans carry `... until 1700000000000` (epoch ms) in the body.
fn ban_until(body: &str) -> Option<Duration> {
    let caps = BAN_UNTIL.captures(body)?;
    let until_ms = caps.get(1)?.as_str().parse::<u64>().ok()?;
    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_millis() as u64;
    (until_ms > now_ms).then(|| Duration::from_millis(until_ms - now_ms))
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_reads_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn ban_until_only_for_future_timestamps() {
        let future = now_ms() + 5_000;
        let body = format!(r#"{{"code":-1003,"msg":"IP banned until {future}."}}"#);
        let wait = ban_until(&body).unwrap();
        assert!(wait <= Duration::from_millis(5_000));
        assert_eq!(ban_until(r#"{"msg":"banned until 1000"}"#), None);
        assert_eq!(ban_until("no ban here"), None);
    }

    #[tokio::test]
    async fn limiter_spaces_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(40));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
