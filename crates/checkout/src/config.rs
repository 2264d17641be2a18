//! Coordinator configuration.

use std::time::Duration;

/// Tunables handed to the coordinator at construction.
///
/// Reads from environment variables:
/// - `CHECKOUT_OP_TIMEOUT_MS`: deadline for a whole commit or rollback (default: `5000`)
/// - `CHECKOUT_CLEAR_ATTEMPTS`: tries for clearing a staging record after a restore (default: `3`)
/// - `CHECKOUT_CLEAR_BACKOFF_MS`: pause between those tries (default: `50`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub op_timeout: Duration,
    pub clear_attempts: u32,
    pub clear_backoff: Duration,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            op_timeout: env_millis("CHECKOUT_OP_TIMEOUT_MS").unwrap_or(defaults.op_timeout),
            clear_attempts: std::env::var("CHECKOUT_CLEAR_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.clear_attempts),
            clear_backoff: env_millis("CHECKOUT_CLEAR_BACKOFF_MS")
                .unwrap_or(defaults.clear_backoff),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(5),
            clear_attempts: 3,
            clear_backoff: Duration::from_millis(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CheckoutConfig::default();
        assert_eq!(config.op_timeout, Duration::from_secs(5));
        assert_eq!(config.clear_attempts, 3);
        assert_eq!(config.clear_backoff, Duration::from_millis(50));
    }
}
