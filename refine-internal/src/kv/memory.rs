use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use super::{month_key, CounterStore, LicenseRecord, LicenseStore};
use crate::error::Error;
use crate::telemetry::{
    log_event, DailySummary, MonthlySummary, TelemetrySink, UsageEvent, UsageTotals,
};

/// Process-local store. State is lost on restart and is not shared between
/// replicas.
#[derive(Default)]
pub struct MemoryStore {
    licenses: DashMap<String, LicenseRecord>,
    rate_counters: DashMap<(String, NaiveDate), u64>,
    daily: DashMap<NaiveDate, UsageTotals>,
    monthly: DashMap<String, UsageTotals>,
}

impl MemoryStore {
    pub fn put_license(&self, license_key: &str, record: LicenseRecord) {
        self.licenses.insert(license_key.to_string(), record);
    }
}

#[async_trait]
impl LicenseStore for MemoryStore {
    async fn get_license(&self, license_key: &str) -> Result<Option<LicenseRecord>, Error> {
        Ok(self.licenses.get(license_key).map(|r| r.value().clone()))
    }

    fn source(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_daily(&self, client_id: &str, day: NaiveDate) -> Result<u64, Error> {
        // The entry guard holds the shard lock, so the increment is atomic per key.
        let count = {
            let mut entry = self
                .rate_counters
                .entry((client_id.to_string(), day))
                .or_insert(0);
            *entry += 1;
            *entry
        };
        if count == 1 {
            self.rate_counters.retain(|(_, d), _| *d >= day);
        }
        Ok(count)
    }
}

#[async_trait]
impl TelemetrySink for MemoryStore {
    async fn record(&self, event: &UsageEvent) -> Result<(), Error> {
        log_event(event);
        self.daily.entry(event.day()).or_default().add(event);
        self.monthly
            .entry(month_key(event.day()))
            .or_default()
            .add(event);
        Ok(())
    }

    async fn daily_summary(&self, day: NaiveDate) -> Result<Option<DailySummary>, Error> {
        Ok(self.daily.get(&day).and_then(|t| t.daily_summary()))
    }

    async fn monthly_summary(&self, month: NaiveDate) -> Result<Option<MonthlySummary>, Error> {
        Ok(self
            .monthly
            .get(&month_key(month))
            .and_then(|t| t.monthly_summary()))
    }
}
