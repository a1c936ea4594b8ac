use async_trait::async_trait;
use chrono::NaiveDate;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use strum::IntoEnumIterator;
use tracing::instrument;

use super::{day_key, month_key, CounterStore, LicenseRecord, LicenseStore};
use crate::error::{Error, ErrorDetails};
use crate::pricing::round_usd;
use crate::telemetry::{
    DailySummary, MonthlySummary, RequestSource, TelemetrySink, UsageEvent,
};
use crate::tier::PlanTier;

const LICENSE_KEY_PREFIX: &str = "license:";
const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:";
const PING_KEY: &str = "debug:ping";

const RATE_LIMIT_TTL_SECONDS: i64 = 86_400;
const DAILY_TTL_SECONDS: i64 = 90 * 86_400;
const MONTHLY_TTL_SECONDS: i64 = 365 * 86_400;

fn kv_error(operation: &str, e: redis::RedisError) -> Error {
    Error::new(ErrorDetails::KvStore {
        message: format!("{operation} failed: {e}"),
    })
}

fn rate_limit_key(client_id: &str, day: NaiveDate) -> String {
    format!("{RATE_LIMIT_KEY_PREFIX}{client_id}:{}", day_key(day))
}

struct DailyKeys {
    events: String,
    calls: String,
    cost: String,
    input_tokens: String,
    output_tokens: String,
    items: String,
    retries: String,
}

impl DailyKeys {
    fn new(day: NaiveDate) -> Self {
        let day = day_key(day);
        Self {
            events: format!("telemetry:daily:{day}"),
            calls: format!("telemetry:calls:daily:{day}"),
            cost: format!("telemetry:cost:daily:{day}"),
            input_tokens: format!("telemetry:tokens:daily:{day}:input"),
            output_tokens: format!("telemetry:tokens:daily:{day}:output"),
            items: format!("telemetry:items:daily:{day}"),
            retries: format!("telemetry:retries:daily:{day}"),
        }
    }

    fn tier(tier: PlanTier, day: NaiveDate) -> String {
        format!("telemetry:tier:{tier}:{}", day_key(day))
    }

    fn source(source: RequestSource, day: NaiveDate) -> String {
        format!("telemetry:source:{source}:{}", day_key(day))
    }
}

struct MonthlyKeys {
    calls: String,
    cost: String,
    input_tokens: String,
    output_tokens: String,
    items: String,
}

impl MonthlyKeys {
    fn new(month: NaiveDate) -> Self {
        let month = month_key(month);
        Self {
            calls: format!("telemetry:calls:monthly:{month}"),
            cost: format!("telemetry:cost:monthly:{month}"),
            input_tokens: format!("telemetry:tokens:monthly:{month}:input"),
            output_tokens: format!("telemetry:tokens:monthly:{month}:output"),
            items: format!("telemetry:items:monthly:{month}"),
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl RedisStore {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new_without_logging(ErrorDetails::KvStore {
                    message: format!("Failed to get Redis connection: {e}"),
                })
            })?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let result: Result<Option<String>, redis::RedisError> = async {
            let () = conn.set(PING_KEY, "pong").await?;
            conn.get(PING_KEY).await
        }
        .await;
        match result {
            Ok(value) => value.as_deref() == Some("pong"),
            Err(e) => {
                tracing::warn!("KV round trip failed: {e}");
                false
            }
        }
    }

    pub async fn put_license(&self, license_key: &str, record: &LicenseRecord) -> Result<(), Error> {
        let json = serde_json::to_string(record).map_err(|e| {
            Error::new(ErrorDetails::Serialization {
                message: format!("Failed to serialize license record: {e}"),
            })
        })?;
        let mut conn = self.conn.clone();
        let () = conn
            .set(format!("{LICENSE_KEY_PREFIX}{license_key}"), json)
            .await
            .map_err(|e| kv_error("SET license", e))?;
        Ok(())
    }
}

#[async_trait]
impl LicenseStore for RedisStore {
    #[instrument(skip_all, level = "debug")]
    async fn get_license(&self, license_key: &str) -> Result<Option<LicenseRecord>, Error> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(format!("{LICENSE_KEY_PREFIX}{license_key}"))
            .await
            .map_err(|e| kv_error("GET license", e))?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                Error::new(ErrorDetails::KvStore {
                    message: format!("Malformed license record: {e}"),
                })
            })
        })
        .transpose()
    }

    fn source(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_daily(&self, client_id: &str, day: NaiveDate) -> Result<u64, Error> {
        let key = rate_limit_key(client_id, day);
        let mut conn = self.conn.clone();
        let count: u64 = conn
            .incr(&key, 1)
            .await
            .map_err(|e| kv_error("INCR rate limit", e))?;
        if count == 1 {
            let () = conn
                .expire(&key, RATE_LIMIT_TTL_SECONDS)
                .await
                .map_err(|e| kv_error("EXPIRE rate limit", e))?;
        }
        Ok(count)
    }
}

#[async_trait]
impl TelemetrySink for RedisStore {
    #[instrument(skip_all, fields(request_id = %event.request_id))]
    async fn record(&self, event: &UsageEvent) -> Result<(), Error> {
        let json = serde_json::to_string(event).map_err(|e| {
            Error::new(ErrorDetails::Serialization {
                message: format!("Failed to serialize usage event: {e}"),
            })
        })?;
        let day = event.day();
        let daily = DailyKeys::new(day);
        let monthly = MonthlyKeys::new(day);
        let tier_key = DailyKeys::tier(event.tier, day);
        let source_key = DailyKeys::source(event.source, day);
        let cost = event.cost_usd.max(0.0);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(format!("telemetry:event:{}", event.request_id))
            .arg(json)
            .arg("EX")
            .arg(DAILY_TTL_SECONDS)
            .ignore()
            .lpush(&daily.events, event.request_id.to_string())
            .ignore()
            .incr(&daily.calls, 1u64)
            .ignore()
            .cmd("INCRBYFLOAT")
            .arg(&daily.cost)
            .arg(cost)
            .ignore()
            .incr(&daily.input_tokens, event.input_tokens)
            .ignore()
            .incr(&daily.output_tokens, event.output_tokens)
            .ignore()
            .incr(&daily.items, event.item_count as u64)
            .ignore()
            .incr(&daily.retries, u64::from(event.retried))
            .ignore()
            .incr(&tier_key, 1u64)
            .ignore()
            .incr(&source_key, 1u64)
            .ignore()
            .incr(&monthly.calls, 1u64)
            .ignore()
            .cmd("INCRBYFLOAT")
            .arg(&monthly.cost)
            .arg(cost)
            .ignore()
            .incr(&monthly.input_tokens, event.input_tokens)
            .ignore()
            .incr(&monthly.output_tokens, event.output_tokens)
            .ignore()
            .incr(&monthly.items, event.item_count as u64)
            .ignore();

        for key in [
            &daily.events,
            &daily.calls,
            &daily.cost,
            &daily.input_tokens,
            &daily.output_tokens,
            &daily.items,
            &daily.retries,
            &tier_key,
            &source_key,
        ] {
            pipe.expire(key, DAILY_TTL_SECONDS).ignore();
        }
        for key in [
            &monthly.calls,
            &monthly.cost,
            &monthly.input_tokens,
            &monthly.output_tokens,
            &monthly.items,
        ] {
            pipe.expire(key, MONTHLY_TTL_SECONDS).ignore();
        }

        let mut conn = self.conn.clone();
        let () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| kv_error("telemetry pipeline", e))?;
        Ok(())
    }

    async fn daily_summary(&self, day: NaiveDate) -> Result<Option<DailySummary>, Error> {
        let keys = DailyKeys::new(day);
        let mut conn = self.conn.clone();
        let (calls, cost, input_tokens, output_tokens, items, retries): (
            Option<u64>,
            Option<f64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
        ) = redis::pipe()
            .get(&keys.calls)
            .get(&keys.cost)
            .get(&keys.input_tokens)
            .get(&keys.output_tokens)
            .get(&keys.items)
            .get(&keys.retries)
            .query_async(&mut conn)
            .await
            .map_err(|e| kv_error("daily summary", e))?;

        let calls = calls.unwrap_or(0);
        if calls == 0 {
            return Ok(None);
        }

        let tiers: Vec<PlanTier> = PlanTier::iter().collect();
        let sources: Vec<RequestSource> = RequestSource::iter().collect();
        let mut pipe = redis::pipe();
        for tier in &tiers {
            pipe.get(DailyKeys::tier(*tier, day));
        }
        for source in &sources {
            pipe.get(DailyKeys::source(*source, day));
        }
        let counts: Vec<Option<u64>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| kv_error("daily breakdown", e))?;
        let (tier_counts, source_counts) = counts.split_at(tiers.len().min(counts.len()));

        Ok(Some(DailySummary {
            calls,
            input_tokens: input_tokens.unwrap_or(0),
            output_tokens: output_tokens.unwrap_or(0),
            cost_usd: round_usd(cost.unwrap_or(0.0)),
            items: items.unwrap_or(0),
            retries: retries.unwrap_or(0),
            by_tier: tiers
                .iter()
                .zip(tier_counts)
                .filter_map(|(tier, count)| count.map(|c| (tier.to_string(), c)))
                .collect(),
            by_source: sources
                .iter()
                .zip(source_counts)
                .filter_map(|(source, count)| count.map(|c| (source.to_string(), c)))
                .collect(),
        }))
    }

    async fn monthly_summary(&self, month: NaiveDate) -> Result<Option<MonthlySummary>, Error> {
        let keys = MonthlyKeys::new(month);
        let mut conn = self.conn.clone();
        let (calls, cost, input_tokens, output_tokens, items): (
            Option<u64>,
            Option<f64>,
            Option<u64>,
            Option<u64>,
            Option<u64>,
        ) = redis::pipe()
            .get(&keys.calls)
            .get(&keys.cost)
            .get(&keys.input_tokens)
            .get(&keys.output_tokens)
            .get(&keys.items)
            .query_async(&mut conn)
            .await
            .map_err(|e| kv_error("monthly summary", e))?;

        let calls = calls.unwrap_or(0);
        if calls == 0 {
            return Ok(None);
        }
        Ok(Some(MonthlySummary {
            calls,
            input_tokens: input_tokens.unwrap_or(0),
            output_tokens: output_tokens.unwrap_or(0),
            cost_usd: round_usd(cost.unwrap_or(0.0)),
            items: items.unwrap_or(0),
        }))
    }
}
