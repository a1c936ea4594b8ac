#![cfg(test)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::NaiveDate;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::completion::{Completion, CompletionRequest, CompletionService};
use crate::config_parser::Config;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{build_router, AppStateData};
use crate::kv::{CounterStore, KvBackend, LicenseRecord, LicenseStore, MemoryStore};
use crate::telemetry::{DailySummary, MonthlySummary, TelemetrySink, UsageEvent};

pub const MOCK_MODEL: &str = "claude-haiku-4-5-20250414";
pub const MOCK_INPUT_TOKENS: u64 = 1_200;
pub const MOCK_OUTPUT_TOKENS: u64 = 800;

/// A store whose every operation fails.
pub struct FailingStore;

fn store_down() -> Error {
    Error::new(ErrorDetails::KvStore {
        message: "store unavailable".to_string(),
    })
}

#[async_trait]
impl LicenseStore for FailingStore {
    async fn get_license(&self, _license_key: &str) -> Result<Option<LicenseRecord>, Error> {
        Err(store_down())
    }

    fn source(&self) -> &'static str {
        "failing"
    }
}

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment_daily(&self, _client_id: &str, _day: NaiveDate) -> Result<u64, Error> {
        Err(store_down())
    }
}

#[async_trait]
impl TelemetrySink for FailingStore {
    async fn record(&self, _event: &UsageEvent) -> Result<(), Error> {
        Err(store_down())
    }

    async fn daily_summary(&self, _day: NaiveDate) -> Result<Option<DailySummary>, Error> {
        Err(store_down())
    }

    async fn monthly_summary(&self, _month: NaiveDate) -> Result<Option<MonthlySummary>, Error> {
        Err(store_down())
    }
}

/// A schema-valid refined item.
pub fn refined_item_json(title: &str) -> Value {
    json!({
        "title": title,
        "problem": "Users cannot reset their password without contacting support.",
        "acceptanceCriteria": [
            "Reset link is emailed within 60 seconds",
            "Link expires after 24 hours"
        ],
        "estimate": "M",
        "priority": "HIGH — blocks self-service onboarding",
        "tags": ["auth", "onboarding"],
        "assumptions": ["Email provider is already configured"]
    })
}

/// Model output text for one valid item per title.
pub fn refined_items_text(titles: &[&str]) -> String {
    Value::Array(titles.iter().map(|t| refined_item_json(t)).collect()).to_string()
}

pub enum MockReply {
    Text(String),
    Unavailable,
}

/// Replays scripted replies in order and records every request it receives.
/// Once the script runs out, it behaves as if the service were down.
pub struct MockCompletionService {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionService {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[String]) -> Self {
        Self::new(texts.iter().cloned().map(MockReply::Text).collect())
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    fn model_name(&self) -> &str {
        MOCK_MODEL
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, Error> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(MockReply::Text(text)) => Ok(Completion {
                text,
                input_tokens: MOCK_INPUT_TOKENS,
                output_tokens: MOCK_OUTPUT_TOKENS,
            }),
            Some(MockReply::Unavailable) | None => {
                Err(Error::new(ErrorDetails::CompletionUnavailable {
                    message: "mock service unavailable".to_string(),
                    status_code: None,
                }))
            }
        }
    }
}

/// App state backed by a fresh in-memory store and the given completion mock.
pub fn test_app_state(completion: Arc<MockCompletionService>) -> AppStateData {
    test_app_state_with_store(completion, MemoryStore::default())
}

pub fn test_app_state_with_store(
    completion: Arc<MockCompletionService>,
    store: MemoryStore,
) -> AppStateData {
    AppStateData::from_parts(
        Arc::new(Config::default()),
        Arc::new(KvBackend::Memory(store)),
        completion,
        Some("admin-secret".to_string().into()),
    )
    .unwrap()
}

/// A Prometheus handle that is not installed as the global recorder.
pub fn test_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Sends one request through the full router and decodes the JSON body (`Null` when empty).
pub async fn send(state: AppStateData, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = build_router(state, test_metrics_handle())
        .oneshot(request)
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
