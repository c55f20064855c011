//! Rate limit configuration.
//!
//! A single [`RateLimitConfig`] value drives all six algorithms. Each
//! algorithm reads only the parameters it needs: token bucket uses
//! `max_requests` and `refill_rate`, leaky bucket uses `max_requests`, and
//! the window-based algorithms use `max_requests` and `window`.
//!
//! # Examples
//!
//! ```ignore
//! use skp_distlimit::RateLimitConfig;
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let config = RateLimitConfig::per_minute(100);
//!
//! // Bucket of 10 tokens refilled at one token per second
//! let config = RateLimitConfig::per_second(10).with_refill_rate(1.0);
//!
//! // Custom: 50 requests per 30 seconds, validated
//! let config = RateLimitConfig::try_new(50, Duration::from_secs(30))?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Immutable rate limiting parameters shared by every call of a limiter.
///
/// Validated on construction: capacity, window and refill rate are always
/// strictly positive, so no algorithm ever divides by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RateLimitConfigBuilder")]
pub struct RateLimitConfig {
    /// Capacity: bucket size, queue depth or requests per window.
    max_requests: u64,

    /// Time window duration.
    window: Duration,

    /// Refill rate for the token bucket (tokens per second).
    /// If not set, calculated from max_requests / window.
    #[serde(skip_serializing_if = "Option::is_none")]
    refill_rate: Option<f64>,
}

impl RateLimitConfig {
    /// Create a new configuration with the given capacity and window.
    ///
    /// # Panics
    ///
    /// Panics if `max_requests` is 0 or `window` is zero duration.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        match Self::validated(max_requests, window, None) {
            Ok(config) => config,
            Err(err) => panic!("{err}"),
        }
    }

    /// Try to create a new configuration, returning an error if invalid.
    pub fn try_new(max_requests: u64, window: Duration) -> Result<Self> {
        Ok(Self::validated(max_requests, window, None)?)
    }

    /// `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Create a configuration builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Set the token bucket refill rate (tokens per second).
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not a finite, strictly positive number.
    pub fn with_refill_rate(self, rate: f64) -> Self {
        match Self::validated(self.max_requests, self.window, Some(rate)) {
            Ok(config) => config,
            Err(err) => panic!("{err}"),
        }
    }

    fn validated(
        max_requests: u64,
        window: Duration,
        refill_rate: Option<f64>,
    ) -> std::result::Result<Self, ConfigError> {
        if max_requests == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_requests must be greater than 0".into(),
            ));
        }
        if i64::try_from(max_requests).is_err() {
            return Err(ConfigError::InvalidConfig(
                "max_requests does not fit in a signed 64-bit integer".into(),
            ));
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidConfig("window must be non-zero".into()));
        }
        if i64::try_from(window.as_nanos()).is_err() {
            return Err(ConfigError::InvalidConfig(
                "window is too large to express in nanoseconds".into(),
            ));
        }
        if let Some(rate) = refill_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidConfig(format!(
                    "refill_rate must be a positive number, got {rate}"
                )));
            }
        }
        Ok(Self {
            max_requests,
            window,
            refill_rate,
        })
    }

    /// Capacity of the limiter.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Window length in nanoseconds.
    pub fn window_nanos(&self) -> i64 {
        // Bounded by validation.
        self.window.as_nanos() as i64
    }

    /// Get the effective refill rate (tokens per second).
    ///
    /// Returns the configured rate, or calculates from `max_requests / window_seconds`.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
            .unwrap_or_else(|| self.max_requests as f64 / self.window.as_secs_f64())
    }

    /// Store expiry for window-scoped keys: the window rounded up to whole
    /// seconds, never less than one second.
    pub fn window_ttl_secs(&self) -> u64 {
        ceil_secs(self.window.as_secs_f64())
    }

    pub(crate) fn capacity_i64(&self) -> i64 {
        self.max_requests as i64
    }
}

/// Round a span in seconds up to a store TTL of at least one second.
pub(crate) fn ceil_secs(secs: f64) -> u64 {
    if secs.is_finite() && secs > 1.0 {
        secs.ceil() as u64
    } else {
        1
    }
}

/// Builder for creating configurations with validation.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfigBuilder {
    max_requests: Option<u64>,
    window: Option<Duration>,
    refill_rate: Option<f64>,
}

impl RateLimitConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the capacity.
    pub fn max_requests(mut self, n: u64) -> Self {
        self.max_requests = Some(n);
        self
    }

    /// Set the window duration. Defaults to one second.
    pub fn window(mut self, duration: Duration) -> Self {
        self.window = Some(duration);
        self
    }

    /// Set the refill rate.
    pub fn refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = Some(rate);
        self
    }

    /// Build the configuration, returning an error if invalid.
    pub fn build(self) -> Result<RateLimitConfig> {
        Ok(RateLimitConfig::try_from(self)?)
    }
}

impl TryFrom<RateLimitConfigBuilder> for RateLimitConfig {
    type Error = ConfigError;

    fn try_from(builder: RateLimitConfigBuilder) -> std::result::Result<Self, Self::Error> {
        let max_requests = builder
            .max_requests
            .ok_or_else(|| ConfigError::MissingRequired("max_requests".into()))?;
        let window = builder.window.unwrap_or(Duration::from_secs(1));

        Self::validated(max_requests, window, builder.refill_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RateLimitError;

    #[test]
    fn test_config_per_second() {
        let config = RateLimitConfig::per_second(10);
        assert_eq!(config.max_requests(), 10);
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.window_nanos(), 1_000_000_000);
        assert!((config.refill_rate() - 10.0).abs() < 0.001);
    }

    #[test]
    fn test_config_per_minute() {
        let config = RateLimitConfig::per_minute(60);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert!((config.refill_rate() - 1.0).abs() < 0.001);
        assert_eq!(config.window_ttl_secs(), 60);
    }

    #[test]
    fn test_explicit_refill_rate() {
        let config = RateLimitConfig::per_second(10).with_refill_rate(1.0);
        assert_eq!(config.max_requests(), 10);
        assert_eq!(config.refill_rate(), 1.0);
    }

    #[test]
    fn test_window_ttl_rounds_up() {
        let config = RateLimitConfig::new(5, Duration::from_millis(1500));
        assert_eq!(config.window_ttl_secs(), 2);

        let config = RateLimitConfig::new(5, Duration::from_millis(100));
        assert_eq!(config.window_ttl_secs(), 1);
    }

    #[test]
    fn test_try_new_rejects_zero() {
        let err = RateLimitConfig::try_new(0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::InvalidConfig(_))));

        assert!(RateLimitConfig::try_new(10, Duration::ZERO).is_err());
    }

    #[test]
    fn test_builder_defaults_window() {
        let config = RateLimitConfig::builder()
            .max_requests(10)
            .refill_rate(1.0)
            .build()
            .unwrap();

        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.refill_rate(), 1.0);
    }

    #[test]
    fn test_builder_rejects_bad_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = RateLimitConfig::builder()
                .max_requests(10)
                .refill_rate(rate)
                .build();
            assert!(result.is_err(), "rate {rate} should be rejected");
        }
    }

    #[test]
    fn test_builder_missing_capacity() {
        let err = RateLimitConfig::builder()
            .window(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, RateLimitError::Config(ConfigError::MissingRequired(_))));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = RateLimitConfig::per_minute(100).with_refill_rate(2.5);
        let json = serde_json::to_string(&config).unwrap();
        let back: RateLimitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn test_config_deserialize_validates() {
        let json = r#"{"max_requests":0,"window":{"secs":1,"nanos":0}}"#;
        assert!(serde_json::from_str::<RateLimitConfig>(json).is_err());

        let json = r#"{"max_requests":3}"#;
        let config: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.window(), Duration::from_secs(1));
    }

    #[test]
    #[should_panic]
    fn test_config_zero_requests_panics() {
        RateLimitConfig::new(0, Duration::from_secs(60));
    }

    #[test]
    #[should_panic]
    fn test_config_zero_window_panics() {
        RateLimitConfig::new(100, Duration::ZERO);
    }
}
