use super::secs;
use tm_supervisor::HealthChecker;

pub(crate) async fn cmd_health(
    url: &str,
    max_retries: u32,
    sleep_interval: f64,
    timeout: f64,
) -> anyhow::Result<()> {
    let result = HealthChecker::new()
        .with_max_retries(max_retries)
        .with_sleep_interval(secs(sleep_interval, "sleep-interval")?)
        .with_timeout(secs(timeout, "timeout")?)
        .check(url)
        .await;

    if !result.healthy {
        anyhow::bail!(
            "Node {} did not pass health-check after {} attempts",
            url,
            result.attempts
        );
    }
    Ok(())
}
