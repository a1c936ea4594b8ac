pub mod client;
pub mod limiter;

use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{HeaderMap, HeaderValue};
use serde::Serialize;

pub use client::client_identifier;
pub use limiter::RateLimiter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,               // Unix timestamp
    pub retry_after: Option<u64>, // Seconds
}

impl RateLimitHeaders {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        // Numbers always produce valid header values.
        if let Ok(value) = HeaderValue::from_str(&self.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }

        if let Ok(value) = HeaderValue::from_str(&self.reset.to_string()) {
            headers.insert("X-RateLimit-Reset", value);
        }

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert("Retry-After", value);
            }
        }

        headers
    }
}

/// Result of a rate limit check. `None` limits mean the tier is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub headers: Option<RateLimitHeaders>,
}

impl RateLimitDecision {
    pub fn unbounded() -> Self {
        Self {
            allowed: true,
            limit: None,
            remaining: None,
            headers: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Counters for rate limiter monitoring
#[derive(Debug, Default)]
pub struct RateLimiterMetrics {
    pub allowed: AtomicU64,
    pub denied: AtomicU64,
    pub store_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub allowed: u64,
    pub denied: u64,
    pub store_failures: u64,
}

impl RateLimiterMetrics {
    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_headers() {
        let headers = RateLimitHeaders {
            limit: 3,
            remaining: 2,
            reset: 1_771_372_800,
            retry_after: None,
        };

        let header_map = headers.to_header_map();

        assert_eq!(header_map["X-RateLimit-Limit"], "3");
        assert_eq!(header_map["X-RateLimit-Remaining"], "2");
        assert_eq!(header_map["X-RateLimit-Reset"], "1771372800");
        assert!(!header_map.contains_key("Retry-After"));
    }

    #[test]
    fn test_rate_limit_headers_with_retry_after() {
        let headers = RateLimitHeaders {
            limit: 3,
            remaining: 0,
            reset: 1_771_372_800,
            retry_after: Some(3600),
        };
        assert_eq!(headers.to_header_map()["Retry-After"], "3600");
    }

    #[test]
    fn test_metrics_stats() {
        let metrics = RateLimiterMetrics::default();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_denied();
        metrics.record_store_failure();
        assert_eq!(
            metrics.get_stats(),
            RateLimiterStats {
                allowed: 2,
                denied: 1,
                store_failures: 1
            }
        );
    }
}
