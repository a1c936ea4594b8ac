//! Usage telemetry: one event per refinement call, aggregated by day and month.
//!
//! Telemetry is non-authoritative. Writes go through [`UsageRecorder`] so a
//! slow or failing sink can never delay or alter a response.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::error::Error;
use crate::tier::PlanTier;

pub mod batcher;

pub use batcher::UsageRecorder;

/// Where a request came from.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RequestSource {
    Browser,
    Mcp,
    #[default]
    ApiDirect,
}

impl RequestSource {
    /// Explicit `x-source`/`x-client` headers win over user-agent sniffing.
    pub fn detect(headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let x_source = header("x-source");
        let x_client = header("x-client");

        if x_source == Some("mcp") || x_client == Some("mcp") {
            return RequestSource::Mcp;
        }
        match x_source {
            Some("browser") => return RequestSource::Browser,
            Some("api-direct") => return RequestSource::ApiDirect,
            _ => {}
        }

        let ua = header("user-agent").unwrap_or_default().to_lowercase();
        if ["mozilla/", "chrome/", "safari/"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            return RequestSource::Browser;
        }
        if ["anthropic", "claude", "mcp-"]
            .iter()
            .any(|needle| ua.contains(needle))
        {
            return RequestSource::Mcp;
        }
        RequestSource::ApiDirect
    }
}

/// Write-once record of a single refinement call.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub tier: PlanTier,
    pub item_count: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub retried: bool,
    /// Truncated SHA-256 of the rate-limit client identifier.
    pub client_hash: String,
    pub source: RequestSource,
}

impl UsageEvent {
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

pub fn anonymize_client(client_id: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(client_id.as_bytes()));
    digest.chars().take(16).collect()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub items: u64,
    pub retries: u64,
    pub by_tier: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub items: u64,
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &UsageEvent) -> Result<(), Error>;

    /// `None` when nothing was recorded that day.
    async fn daily_summary(&self, day: NaiveDate) -> Result<Option<DailySummary>, Error>;

    /// Summary for the calendar month containing `month`.
    async fn monthly_summary(&self, month: NaiveDate) -> Result<Option<MonthlySummary>, Error>;
}

/// Running totals used by the in-memory store.
#[derive(Clone, Debug, Default)]
pub(crate) struct UsageTotals {
    calls: u64,
    input_tokens: u64,
    output_tokens: u64,
    cost_usd: f64,
    items: u64,
    retries: u64,
    by_tier: HashMap<PlanTier, u64>,
    by_source: HashMap<RequestSource, u64>,
}

impl UsageTotals {
    pub(crate) fn add(&mut self, event: &UsageEvent) {
        self.calls += 1;
        self.input_tokens += event.input_tokens;
        self.output_tokens += event.output_tokens;
        self.cost_usd += event.cost_usd.max(0.0);
        self.items += event.item_count as u64;
        if event.retried {
            self.retries += 1;
        }
        *self.by_tier.entry(event.tier).or_default() += 1;
        *self.by_source.entry(event.source).or_default() += 1;
    }

    pub(crate) fn daily_summary(&self) -> Option<DailySummary> {
        if self.calls == 0 {
            return None;
        }
        Some(DailySummary {
            calls: self.calls,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_usd: crate::pricing::round_usd(self.cost_usd),
            items: self.items,
            retries: self.retries,
            by_tier: self
                .by_tier
                .iter()
                .map(|(tier, count)| (tier.to_string(), *count))
                .collect(),
            by_source: self
                .by_source
                .iter()
                .map(|(source, count)| (source.to_string(), *count))
                .collect(),
        })
    }

    pub(crate) fn monthly_summary(&self) -> Option<MonthlySummary> {
        if self.calls == 0 {
            return None;
        }
        Some(MonthlySummary {
            calls: self.calls,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_usd: crate::pricing::round_usd(self.cost_usd),
            items: self.items,
        })
    }
}

/// Emits the event as a structured log line. Used when no persistent sink is
/// reachable.
pub fn log_event(event: &UsageEvent) {
    match serde_json::to_string(event) {
        Ok(json) => tracing::info!(target: "telemetry", "{json}"),
        Err(e) => tracing::warn!(target: "telemetry", "Failed to serialize usage event: {e}"),
    }
}

#[cfg(test)]
pub(crate) fn test_event(tier: PlanTier, source: RequestSource) -> UsageEvent {
    UsageEvent {
        request_id: Uuid::now_v7(),
        timestamp: Utc::now(),
        model: "claude-haiku-4-5-20250414".to_string(),
        tier,
        item_count: 3,
        input_tokens: 1000,
        output_tokens: 2000,
        cost_usd: 0.011,
        latency_ms: 1200,
        retried: false,
        client_hash: anonymize_client("203.0.113.7"),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_detect_source_explicit_headers() {
        assert_eq!(
            RequestSource::detect(&headers(&[("x-source", "mcp")])),
            RequestSource::Mcp
        );
        assert_eq!(
            RequestSource::detect(&headers(&[("x-client", "mcp")])),
            RequestSource::Mcp
        );
        // Explicit header beats a browser user-agent.
        assert_eq!(
            RequestSource::detect(&headers(&[
                ("x-source", "api-direct"),
                ("user-agent", "Mozilla/5.0 (Macintosh)")
            ])),
            RequestSource::ApiDirect
        );
    }

    #[test]
    fn test_detect_source_user_agent() {
        assert_eq!(
            RequestSource::detect(&headers(&[("user-agent", "Mozilla/5.0 Chrome/120.0")])),
            RequestSource::Browser
        );
        assert_eq!(
            RequestSource::detect(&headers(&[("user-agent", "claude-desktop/0.9")])),
            RequestSource::Mcp
        );
        assert_eq!(
            RequestSource::detect(&headers(&[("user-agent", "curl/8.4.0")])),
            RequestSource::ApiDirect
        );
        assert_eq!(RequestSource::detect(&HeaderMap::new()), RequestSource::ApiDirect);
    }

    #[test]
    fn test_source_serializes_kebab_case() {
        assert_eq!(RequestSource::ApiDirect.to_string(), "api-direct");
        assert_eq!(
            serde_json::to_value(RequestSource::ApiDirect).unwrap(),
            serde_json::json!("api-direct")
        );
    }

    #[test]
    fn test_anonymize_client_is_stable_and_opaque() {
        let a = anonymize_client("203.0.113.7");
        assert_eq!(a.len(), 16);
        assert_eq!(a, anonymize_client("203.0.113.7"));
        assert_ne!(a, anonymize_client("203.0.113.8"));
        assert!(!a.contains("203"));
    }

    #[test]
    fn test_usage_totals() {
        let mut totals = UsageTotals::default();
        assert!(totals.daily_summary().is_none());

        totals.add(&test_event(PlanTier::Free, RequestSource::Browser));
        let mut retried = test_event(PlanTier::Pro, RequestSource::Mcp);
        retried.retried = true;
        totals.add(&retried);

        let daily = totals.daily_summary().unwrap();
        assert_eq!(daily.calls, 2);
        assert_eq!(daily.items, 6);
        assert_eq!(daily.retries, 1);
        assert_eq!(daily.cost_usd, 0.022);
        assert_eq!(daily.by_tier.get("free"), Some(&1));
        assert_eq!(daily.by_source.get("mcp"), Some(&1));

        let monthly = totals.monthly_summary().unwrap();
        assert_eq!(monthly.calls, 2);
        assert_eq!(monthly.input_tokens, 2000);
    }
}
