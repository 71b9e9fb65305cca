//! Rate limiting
//!
//! A server may carry one [`RateLimiter`]. It is consulted before every route
//! call, including each member of an atomic program, and rejects a call by
//! failing with [`RpcError::Ratelimited`].
//!
//! [`TokenBucketLimiter`] is the built-in limiter: one token bucket per route
//! (optionally per route and user), refilled at a fixed rate up to a burst
//! size. Stale buckets are dropped periodically.
//!
//! # Example
//!
//! ```
//! use arpc_server::rate_limit::{RateLimitConfig, RateLimiter, TokenBucketLimiter};
//! use serde_json::Value;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let limiter: TokenBucketLimiter<String> = TokenBucketLimiter::new(RateLimitConfig::new(1.0, 2));
//!
//! assert!(limiter.check("echo", &Value::Null, None).await.is_ok());
//! assert!(limiter.check("echo", &Value::Null, None).await.is_ok());
//! assert!(limiter.check("echo", &Value::Null, None).await.is_err());
//!
//! // Other routes have their own bucket
//! assert!(limiter.check("other", &Value::Null, None).await.is_ok());
//! # });
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arpc_common::RpcError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// Decides whether a route call may proceed.
#[async_trait]
pub trait RateLimiter<U>: Send + Sync {
    /// Fails (normally with [`RpcError::Ratelimited`]) to reject the call.
    async fn check(&self, route: &str, arg: &Value, user: Option<&U>) -> anyhow::Result<()>;
}

/// Configuration for a [`TokenBucketLimiter`].
///
/// # Fields
///
/// * `requests_per_second` - Sustained rate each bucket refills at
/// * `burst_size` - Tokens a full bucket holds
/// * `cleanup_interval` - How often stale buckets are dropped
/// * `entry_ttl` - How long an unused bucket is kept
///
/// # Example
///
/// ```
/// use arpc_server::rate_limit::RateLimitConfig;
///
/// let config = RateLimitConfig::per_minute(600);
/// assert_eq!(config.requests_per_second, 10.0);
/// assert_eq!(config.burst_size, 20);
/// ```
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub cleanup_interval: Duration,
    pub entry_ttl: Duration,
}

impl RateLimitConfig {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
            cleanup_interval: Duration::from_secs(60),
            entry_ttl: Duration::from_secs(300), // 5 minutes
        }
    }

    /// Burst size is twice the rate.
    pub fn per_second(rps: f64) -> Self {
        let burst_size = (rps * 2.0).ceil() as u32;
        Self::new(rps, burst_size)
    }

    pub fn per_minute(rpm: u32) -> Self {
        Self::per_second(rpm as f64 / 60.0)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description if the rate is not a positive finite number or
    /// the burst size is zero.
    pub fn validate(&self) -> Result<(), String> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(format!(
                "requests per second must be positive (got {})",
                self.requests_per_second
            ));
        }
        if self.burst_size == 0 {
            return Err("burst size must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(burst_size: u32, now: Instant) -> Self {
        Self {
            tokens: burst_size as f64,
            last_update: now,
        }
    }

    /// Refills for the time elapsed since the last update, then takes a token
    /// if one is available.
    fn try_consume(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.requests_per_second).min(config.burst_size as f64);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn time_until_next_token(&self, config: &RateLimitConfig) -> Duration {
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / config.requests_per_second)
        }
    }
}

type UserKey<U> = dyn Fn(&U) -> String + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    route: String,
    user: Option<String>,
}

/// A token bucket [`RateLimiter`].
///
/// Buckets are keyed by route. With [`TokenBucketLimiter::with_user_key`]
/// they are keyed by route and user, and anonymous calls share one bucket per
/// route.
///
/// Cloning is cheap; clones share their buckets.
pub struct TokenBucketLimiter<U> {
    config: RateLimitConfig,
    user_key: Option<Arc<UserKey<U>>>,
    buckets: Arc<RwLock<HashMap<BucketKey, TokenBucket>>>,
    last_cleanup: Arc<RwLock<Instant>>,
}

impl<U> Clone for TokenBucketLimiter<U> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            user_key: self.user_key.clone(),
            buckets: self.buckets.clone(),
            last_cleanup: self.last_cleanup.clone(),
        }
    }
}

impl<U> TokenBucketLimiter<U> {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            user_key: None,
            buckets: Arc::new(RwLock::new(HashMap::new())),
            last_cleanup: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Gives each user their own bucket per route.
    pub fn with_user_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&U) -> String + Send + Sync + 'static,
    {
        self.user_key = Some(Arc::new(key));
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Takes a token for `route`, returning how long to wait if none is left.
    pub async fn acquire(&self, route: &str, user: Option<&U>) -> Result<(), Duration> {
        let now = Instant::now();

        {
            let mut last_cleanup = self.last_cleanup.write().await;
            if now.saturating_duration_since(*last_cleanup) >= self.config.cleanup_interval {
                self.cleanup_stale_entries(now).await;
                *last_cleanup = now;
            }
        }

        let key = BucketKey {
            route: route.to_string(),
            user: match (&self.user_key, user) {
                (Some(key), Some(user)) => Some(key(user)),
                _ => None,
            },
        };

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.config.burst_size, now));

        if bucket.try_consume(&self.config, now) {
            Ok(())
        } else {
            Err(bucket.time_until_next_token(&self.config))
        }
    }

    async fn cleanup_stale_entries(&self, now: Instant) {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < self.config.entry_ttl);
        let removed = before - buckets.len();
        if removed > 0 {
            tracing::debug!("Dropped {} stale rate limit buckets", removed);
        }
    }

    /// Returns the number of buckets currently tracked.
    pub async fn tracked_buckets(&self) -> usize {
        self.buckets.read().await.len()
    }
}

#[async_trait]
impl<U: Send + Sync> RateLimiter<U> for TokenBucketLimiter<U> {
    async fn check(&self, route: &str, _arg: &Value, user: Option<&U>) -> anyhow::Result<()> {
        match self.acquire(route, user).await {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                let retry_after_ms = retry_after.as_millis().max(1) as u64;
                tracing::debug!("Rate limited call to {} (retry in {}ms)", route, retry_after_ms);
                Err(RpcError::ratelimited(
                    format!("Too many requests to '{}'", route),
                    Some(json!({ "retryAfterMs": retry_after_ms })),
                )
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: f64, burst: u32) -> TokenBucketLimiter<String> {
        TokenBucketLimiter::new(RateLimitConfig::new(rps, burst))
    }

    #[test]
    fn test_rate_limit_config_per_second() {
        let config = RateLimitConfig::per_second(10.0);
        assert_eq!(config.requests_per_second, 10.0);
        assert_eq!(config.burst_size, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_config_validate() {
        assert!(RateLimitConfig::new(0.0, 1).validate().is_err());
        assert!(RateLimitConfig::new(f64::NAN, 1).validate().is_err());
        assert!(RateLimitConfig::new(1.0, 0).validate().is_err());
    }

    #[test]
    fn test_token_bucket_try_consume() {
        let config = RateLimitConfig::new(10.0, 10);
        let now = Instant::now();
        let mut bucket = TokenBucket::new(10, now);

        for _ in 0..10 {
            assert!(bucket.try_consume(&config, now));
        }
        assert!(!bucket.try_consume(&config, now));

        assert!(bucket.try_consume(&config, now + Duration::from_millis(110)));
    }

    #[test]
    fn test_token_bucket_time_until_next_token() {
        let config = RateLimitConfig::new(10.0, 10);
        let bucket = TokenBucket::new(0, Instant::now());
        let wait = bucket.time_until_next_token(&config);
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let limiter = limiter(10.0, 3);
        for _ in 0..3 {
            assert!(limiter.check("echo", &Value::Null, None).await.is_ok());
        }

        let err = limiter.check("echo", &Value::Null, None).await.unwrap_err();
        let rpc = err.downcast_ref::<RpcError>().unwrap();
        assert_eq!(rpc.name(), "Ratelimited");
        assert_eq!(rpc.code(), arpc_common::codes::RATELIMITED);

        let envelope = rpc.to_envelope();
        let retry = envelope.body.unwrap()["retryAfterMs"].as_u64().unwrap();
        assert!(retry >= 1 && retry <= 110);
    }

    #[tokio::test]
    async fn test_refill() {
        let limiter = limiter(20.0, 1);
        assert!(limiter.check("echo", &Value::Null, None).await.is_ok());
        assert!(limiter.check("echo", &Value::Null, None).await.is_err());

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(limiter.check("echo", &Value::Null, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_buckets_per_route() {
        let limiter = limiter(1.0, 1);
        assert!(limiter.check("a", &Value::Null, None).await.is_ok());
        assert!(limiter.check("b", &Value::Null, None).await.is_ok());
        assert!(limiter.check("a", &Value::Null, None).await.is_err());
        assert_eq!(limiter.tracked_buckets().await, 2);
    }

    #[tokio::test]
    async fn test_buckets_per_user() {
        let limiter = limiter(1.0, 1).with_user_key(|u: &String| u.clone());
        let ada = "ada".to_string();
        let bob = "bob".to_string();

        assert!(limiter.check("a", &Value::Null, Some(&ada)).await.is_ok());
        assert!(limiter.check("a", &Value::Null, Some(&bob)).await.is_ok());
        assert!(limiter.check("a", &Value::Null, None).await.is_ok());
        assert!(limiter.check("a", &Value::Null, Some(&ada)).await.is_err());
        assert_eq!(limiter.tracked_buckets().await, 3);
    }

    #[tokio::test]
    async fn test_without_user_key_users_share_bucket() {
        let limiter = limiter(1.0, 1);
        let ada = "ada".to_string();
        let bob = "bob".to_string();
        assert!(limiter.check("a", &Value::Null, Some(&ada)).await.is_ok());
        assert!(limiter.check("a", &Value::Null, Some(&bob)).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_buckets_cleaned() {
        let mut config = RateLimitConfig::new(1.0, 1);
        config.cleanup_interval = Duration::ZERO;
        config.entry_ttl = Duration::from_millis(10);
        let limiter: TokenBucketLimiter<String> = TokenBucketLimiter::new(config);

        limiter.check("a", &Value::Null, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.check("b", &Value::Null, None).await.unwrap();
        assert_eq!(limiter.tracked_buckets().await, 1);
    }

    #[tokio::test]
    async fn test_clones_share_buckets() {
        let limiter = limiter(1.0, 1);
        let clone = limiter.clone();
        assert!(limiter.check("a", &Value::Null, None).await.is_ok());
        assert!(clone.check("a", &Value::Null, None).await.is_err());
    }
}
