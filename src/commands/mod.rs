pub(crate) mod health;
pub(crate) mod node;
pub(crate) mod serve;
pub(crate) mod watch;

use std::time::Duration;

/// Parses a CLI seconds value, rejecting negatives and NaN.
pub(crate) fn secs(value: f64, flag: &str) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow::anyhow!("--{} must be a non-negative number of seconds", flag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_accepts_fractions_and_rejects_negatives() {
        assert_eq!(secs(0.5, "interval").unwrap(), Duration::from_millis(500));
        assert!(secs(-1.0, "interval").is_err());
        assert!(secs(f64::NAN, "interval").is_err());
    }
}
