//! Configuration management for the reservation engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hold and sweep settings
    pub holds: HoldConfig,
    /// Payment gateway settings
    pub gateway: GatewayConfig,
    /// Infrastructure retry settings
    pub retry: RetryConfig,
    /// Notification outbox settings
    pub notifications: NotificationConfig,
    /// Logging and metrics settings
    pub observability: ObservabilityConfig,
}

/// Hold window and sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldConfig {
    /// How long a Pending reservation holds capacity, in seconds
    pub hold_window_secs: u64,
    /// Sweeper tick in seconds
    pub sweep_interval_secs: u64,
    /// Run reconciliation on every sweeper tick
    pub reconcile_on_sweep: bool,
    /// Largest quantity per reservation (0 = unlimited)
    pub max_quantity: u32,
}

/// Payment gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bounded wait on a single gateway call, in milliseconds
    pub timeout_ms: u64,
    /// Success probability of the simulated gateway
    pub simulated_success_rate: f64,
}

/// Retry policy for storage and gateway failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff cap, in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
}

/// Notification outbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Bounded outbox capacity; overflow is dropped
    pub buffer: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            holds: HoldConfig {
                hold_window_secs: 900, // 15 minutes
                sweep_interval_secs: 30,
                reconcile_on_sweep: true,
                max_quantity: 0,
            },
            gateway: GatewayConfig {
                timeout_ms: 5_000,
                simulated_success_rate: 0.9,
            },
            retry: RetryConfig {
                max_retries: 3,
                initial_delay_ms: 50,
                max_delay_ms: 2_000,
                multiplier: 2.0,
            },
            notifications: NotificationConfig { buffer: 256 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_host: "0.0.0.0".to_string(),
                metrics_port: 9090,
            },
        }
    }
}

/// Reads `key` and parses it, falling back to `default` when unset or invalid.
fn var_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            holds: HoldConfig {
                hold_window_secs: var_or("BOXOFFICE_HOLD_WINDOW_SECS", defaults.holds.hold_window_secs),
                sweep_interval_secs: var_or(
                    "BOXOFFICE_SWEEP_INTERVAL_SECS",
                    defaults.holds.sweep_interval_secs,
                ),
                reconcile_on_sweep: var_or(
                    "BOXOFFICE_RECONCILE_ON_SWEEP",
                    defaults.holds.reconcile_on_sweep,
                ),
                max_quantity: var_or("BOXOFFICE_MAX_QUANTITY", defaults.holds.max_quantity),
            },
            gateway: GatewayConfig {
                timeout_ms: var_or("BOXOFFICE_GATEWAY_TIMEOUT_MS", defaults.gateway.timeout_ms),
                simulated_success_rate: var_or::<f64>(
                    "BOXOFFICE_SIMULATED_SUCCESS_RATE",
                    defaults.gateway.simulated_success_rate,
                )
                .clamp(0.0, 1.0),
            },
            retry: RetryConfig {
                max_retries: var_or("BOXOFFICE_RETRY_MAX", defaults.retry.max_retries),
                initial_delay_ms: var_or(
                    "BOXOFFICE_RETRY_INITIAL_DELAY_MS",
                    defaults.retry.initial_delay_ms,
                ),
                max_delay_ms: var_or("BOXOFFICE_RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms),
                multiplier: var_or("BOXOFFICE_RETRY_MULTIPLIER", defaults.retry.multiplier),
            },
            notifications: NotificationConfig {
                buffer: var_or("BOXOFFICE_NOTIFICATION_BUFFER", defaults.notifications.buffer)
                    .max(1),
            },
            observability: ObservabilityConfig {
                log_level: env::var("RUST_LOG").unwrap_or(defaults.observability.log_level),
                metrics_host: env::var("METRICS_HOST")
                    .unwrap_or(defaults.observability.metrics_host),
                metrics_port: var_or("METRICS_PORT", defaults.observability.metrics_port),
            },
        }
    }

    /// Hold window as a `chrono` duration.
    #[must_use]
    pub fn hold_window(&self) -> chrono::Duration {
        const MAX_HOLD_WINDOW_SECS: i64 = 365 * 24 * 60 * 60;
        let secs = i64::try_from(self.holds.hold_window_secs).unwrap_or(MAX_HOLD_WINDOW_SECS);
        chrono::Duration::seconds(secs.min(MAX_HOLD_WINDOW_SECS))
    }

    /// Sweeper tick.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        // tokio rejects a zero period
        if self.holds.sweep_interval_secs == 0 {
            return Duration::from_secs(1);
        }
        Duration::from_secs(self.holds.sweep_interval_secs)
    }

    /// Bounded wait on one gateway call.
    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.timeout_ms)
    }

    /// Retry policy for infrastructure calls.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.retry.max_retries)
            .initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .multiplier(self.retry.multiplier)
            .build()
    }

    /// Metrics listen address as `host:port`.
    #[must_use]
    pub fn metrics_addr(&self) -> String {
        format!(
            "{}:{}",
            self.observability.metrics_host, self.observability.metrics_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_a_fifteen_minute_hold() {
        let config = Config::default();
        assert_eq!(config.hold_window(), chrono::Duration::minutes(15));
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.holds.max_quantity, 0);
        assert_eq!(config.metrics_addr(), "0.0.0.0:9090");
    }

    #[test]
    fn retry_policy_follows_config() {
        let mut config = Config::default();
        config.retry.max_retries = 7;
        config.retry.initial_delay_ms = 10;
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
    }
}
