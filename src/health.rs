use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const HEALTH_PATH: &str = "/health";

/// Outcome of a bounded health wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub healthy: bool,
    /// Requests issued, successful one included.
    pub attempts: u32,
    /// Status of the last response, if any response arrived.
    pub last_status: Option<u16>,
}

/// Polls a node's readiness endpoint with bounded retries.
pub struct HealthChecker {
    client: reqwest::Client,
    max_retries: u32,
    sleep_interval: Duration,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a checker with the default retry budget and timeouts.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the number of requests before giving up.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the pause after each failed attempt.
    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// True as soon as `<url>/health` answers 200, false once retries run out.
    pub async fn wait_until_healthy(&self, url: &str) -> bool {
        self.check(url).await.healthy
    }

    pub async fn check(&self, url: &str) -> HealthCheckResult {
        let endpoint = format!("{}{}", url.trim_end_matches('/'), HEALTH_PATH);
        let mut attempts = 0;
        let mut last_status = None;

        while attempts < self.max_retries {
            attempts += 1;
            match self
                .client
                .get(&endpoint)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    info!("Node at {} is healthy (attempt {})", url, attempts);
                    return HealthCheckResult {
                        healthy: true,
                        attempts,
                        last_status: Some(200),
                    };
                }
                Ok(response) => {
                    last_status = Some(response.status().as_u16());
                    debug!(
                        "Health check attempt {}/{} on {}: status {}",
                        attempts,
                        self.max_retries,
                        endpoint,
                        response.status()
                    );
                }
                Err(e) => {
                    debug!(
                        "Health check attempt {}/{} on {}: {}",
                        attempts, self.max_retries, endpoint, e
                    );
                }
            }
            tokio::time::sleep(self.sleep_interval).await;
        }

        warn!("Node at {} did not become healthy after {} attempts", url, attempts);
        HealthCheckResult {
            healthy: false,
            attempts,
            last_status,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot form of [`HealthChecker::wait_until_healthy`].
pub async fn wait_until_healthy(
    url: &str,
    max_retries: u32,
    sleep_interval: Duration,
    timeout: Duration,
) -> bool {
    HealthChecker::new()
        .with_max_retries(max_retries)
        .with_sleep_interval(sleep_interval)
        .with_timeout(timeout)
        .wait_until_healthy(url)
        .await
}
