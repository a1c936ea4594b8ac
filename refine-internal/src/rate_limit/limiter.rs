use std::sync::Arc;

use chrono::{DateTime, Days, NaiveTime, Utc};
use tracing::{debug, warn};

use super::{RateLimitDecision, RateLimitHeaders, RateLimiterMetrics};
use crate::kv::CounterStore;
use crate::tier::PlanTier;

/// Remaining quota reported when the counter store cannot be reached.
const FAIL_OPEN_REMAINING: u32 = 1;

/// Per-client daily request limiter backed by an atomic day-scoped counter.
///
/// Store failures fail open: availability wins over strict enforcement.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    metrics: Arc<RateLimiterMetrics>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            metrics: Arc::new(RateLimiterMetrics::default()),
        }
    }

    pub fn metrics(&self) -> &RateLimiterMetrics {
        &self.metrics
    }

    pub async fn check(&self, client_id: &str, tier: PlanTier) -> RateLimitDecision {
        self.check_at(client_id, tier, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        client_id: &str,
        tier: PlanTier,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let Some(limit) = tier.limits().max_requests_per_day else {
            self.metrics.record_allowed();
            return RateLimitDecision::unbounded();
        };
        let day = now.date_naive();
        let reset = next_utc_midnight(now);

        match self.store.increment_daily(client_id, day).await {
            Ok(count) => {
                let allowed = count <= u64::from(limit);
                let remaining =
                    u32::try_from(u64::from(limit).saturating_sub(count)).unwrap_or(0);
                let retry_after = if allowed {
                    self.metrics.record_allowed();
                    debug!(client_id, %tier, count, "Rate limit check passed");
                    None
                } else {
                    self.metrics.record_denied();
                    warn!(client_id, %tier, count, limit, "Daily rate limit exceeded");
                    Some(seconds_until(reset, now))
                };
                RateLimitDecision {
                    allowed,
                    limit: Some(limit),
                    remaining: Some(remaining),
                    headers: Some(RateLimitHeaders {
                        limit,
                        remaining,
                        reset: unix_seconds(reset),
                        retry_after,
                    }),
                }
            }
            Err(e) => {
                self.metrics.record_store_failure();
                warn!(client_id, %tier, "Rate limit check failed, allowing request: {e}");
                RateLimitDecision {
                    allowed: true,
                    limit: Some(limit),
                    remaining: Some(FAIL_OPEN_REMAINING),
                    headers: Some(RateLimitHeaders {
                        limit,
                        remaining: FAIL_OPEN_REMAINING,
                        reset: unix_seconds(reset),
                        retry_after: None,
                    }),
                }
            }
        }
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .map(|day| day.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(now)
}

fn unix_seconds(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}

fn seconds_until(reset: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((reset - now).num_seconds()).unwrap_or(0)
}
