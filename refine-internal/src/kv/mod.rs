//! Key-value persistence: license lookups, day-scoped rate counters and
//! telemetry aggregates.
//!
//! Redis is used when a URL is configured; otherwise (or if the connection
//! cannot be established at startup) everything lives in process memory.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::telemetry::{DailySummary, MonthlySummary, TelemetrySink, UsageEvent};
use crate::tier::PlanTier;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    #[serde(alias = "cancelled")]
    Canceled,
    #[serde(other)]
    Unknown,
}

/// A license written by the subscription flow, keyed by license key.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRecord {
    pub customer_id: String,
    pub plan: PlanTier,
    pub status: LicenseStatus,
}

impl LicenseRecord {
    pub fn is_active(&self) -> bool {
        self.status == LicenseStatus::Active
    }
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn get_license(&self, license_key: &str) -> Result<Option<LicenseRecord>, Error>;

    /// Short name of the backing store, used in entitlement logs.
    fn source(&self) -> &'static str;
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter for `(client_id, day)` and returns the new value.
    async fn increment_daily(&self, client_id: &str, day: NaiveDate) -> Result<u64, Error>;
}

pub(crate) fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub(crate) fn month_key(day: NaiveDate) -> String {
    day.format("%Y-%m").to_string()
}

/// The store the gateway runs against.
pub enum KvBackend {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl KvBackend {
    /// Connects to Redis when a URL is given, falling back to memory if the
    /// connection fails. Never fails itself.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url else {
            tracing::info!("KV: fallback (in-memory)");
            return KvBackend::Memory(MemoryStore::default());
        };
        match RedisStore::new(url).await {
            Ok(store) => {
                tracing::info!("KV: connected");
                KvBackend::Redis(store)
            }
            Err(e) => {
                tracing::warn!("KV: fallback (in-memory) after Redis connection failure: {e}");
                KvBackend::Memory(MemoryStore::default())
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, KvBackend::Redis(_))
    }

    /// Set/get round trip against the backing store.
    pub async fn ping(&self) -> bool {
        match self {
            KvBackend::Redis(store) => store.ping().await,
            KvBackend::Memory(_) => false,
        }
    }

    pub async fn put_license(&self, license_key: &str, record: &LicenseRecord) -> Result<(), Error> {
        match self {
            KvBackend::Redis(store) => store.put_license(license_key, record).await,
            KvBackend::Memory(store) => {
                store.put_license(license_key, record.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl LicenseStore for KvBackend {
    async fn get_license(&self, license_key: &str) -> Result<Option<LicenseRecord>, Error> {
        match self {
            KvBackend::Redis(store) => store.get_license(license_key).await,
            KvBackend::Memory(store) => store.get_license(license_key).await,
        }
    }

    fn source(&self) -> &'static str {
        match self {
            KvBackend::Redis(store) => store.source(),
            KvBackend::Memory(store) => store.source(),
        }
    }
}

#[async_trait]
impl CounterStore for KvBackend {
    async fn increment_daily(&self, client_id: &str, day: NaiveDate) -> Result<u64, Error> {
        match self {
            KvBackend::Redis(store) => store.increment_daily(client_id, day).await,
            KvBackend::Memory(store) => store.increment_daily(client_id, day).await,
        }
    }
}

#[async_trait]
impl TelemetrySink for KvBackend {
    async fn record(&self, event: &UsageEvent) -> Result<(), Error> {
        match self {
            KvBackend::Redis(store) => store.record(event).await,
            KvBackend::Memory(store) => store.record(event).await,
        }
    }

    async fn daily_summary(&self, day: NaiveDate) -> Result<Option<DailySummary>, Error> {
        match self {
            KvBackend::Redis(store) => store.daily_summary(day).await,
            KvBackend::Memory(store) => store.daily_summary(day).await,
        }
    }

    async fn monthly_summary(&self, month: NaiveDate) -> Result<Option<MonthlySummary>, Error> {
        match self {
            KvBackend::Redis(store) => store.monthly_summary(month).await,
            KvBackend::Memory(store) => store.monthly_summary(month).await,
        }
    }
}
