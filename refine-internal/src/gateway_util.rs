use std::sync::Arc;
use std::time::Duration;

use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::instrument;

use crate::completion::{AnthropicClient, CompletionService};
use crate::config_parser::{Config, GatewayConfig};
use crate::endpoints;
use crate::error::{Error, ErrorDetails};
use crate::kv::{KvBackend, LicenseStore};
use crate::pricing::PricingTable;
use crate::rate_limit::RateLimiter;
use crate::refine::PromptTemplates;
use crate::telemetry::{TelemetrySink, UsageRecorder};

/// Origins allowed in addition to the configured ones when `gateway.debug` is set.
const DEBUG_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:3001"];

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub kv: Arc<KvBackend>,
    pub licenses: Arc<dyn LicenseStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub completion: Arc<dyn CompletionService>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub recorder: UsageRecorder,
    pub prompts: Arc<PromptTemplates>,
    pub pricing: Arc<PricingTable>,
    pub admin_api_key: Option<SecretString>,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// Reads `REFINE_REDIS_URL`, `ANTHROPIC_API_KEY` and `REFINE_ADMIN_API_KEY`.
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let redis_url = std::env::var("REFINE_REDIS_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let kv = Arc::new(KvBackend::connect(redis_url.as_deref()).await);

        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            Error::new(ErrorDetails::AppState {
                message: "Missing environment variable ANTHROPIC_API_KEY".to_string(),
            })
        })?;
        let completion = Arc::new(AnthropicClient::new(
            setup_http_client(Duration::from_secs(config.model.timeout_secs))?,
            config.model.messages_url()?,
            SecretString::from(api_key),
            config.model.name.clone(),
        ));

        let admin_api_key = std::env::var("REFINE_ADMIN_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);
        if admin_api_key.is_none() {
            tracing::info!("REFINE_ADMIN_API_KEY not set, telemetry endpoint is disabled");
        }

        Self::from_parts(config, kv, completion, admin_api_key)
    }

    /// Wires the shared components around an existing store and completion service.
    /// Must be called from within a tokio runtime, since it starts the usage recorder.
    pub fn from_parts(
        config: Arc<Config>,
        kv: Arc<KvBackend>,
        completion: Arc<dyn CompletionService>,
        admin_api_key: Option<SecretString>,
    ) -> Result<Self, Error> {
        let prompts = Arc::new(PromptTemplates::new()?);
        let pricing = Arc::new(PricingTable::new(&config.pricing));
        let telemetry: Arc<dyn TelemetrySink> = kv.clone();
        let recorder =
            UsageRecorder::with_capacity(telemetry.clone(), config.telemetry.channel_capacity);
        Ok(Self {
            licenses: kv.clone(),
            rate_limiter: Arc::new(RateLimiter::new(kv.clone())),
            telemetry,
            recorder,
            config,
            kv,
            completion,
            prompts,
            pricing,
            admin_api_key,
        })
    }
}

/// Custom Axum extractor that validates the JSON body and deserializes it into a custom type
///
/// When this extractor is present, we don't check if the `Content-Type` header is `application/json`,
/// and instead simply assume that the request body is a JSON object.
pub struct StructuredJson<T>(pub T);

impl<S, T> FromRequest<S> for StructuredJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    #[instrument(skip_all, level = "trace", name = "StructuredJson::from_request")]
    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = bytes::Bytes::from_request(req, state).await.map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: format!("{} ({})", e, e.status()),
            })
        })?;

        let value = Json::<serde_json::Value>::from_bytes(&bytes)
            .map_err(|e| {
                Error::new(ErrorDetails::JsonRequest {
                    message: format!("{} ({})", e, e.status()),
                })
            })?
            .0;

        let deserialized: T = serde_path_to_error::deserialize(&value).map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: e.to_string(),
            })
        })?;

        Ok(StructuredJson(deserialized))
    }
}

pub fn setup_http_client(timeout: Duration) -> Result<Client, Error> {
    Client::builder().timeout(timeout).build().map_err(|e| {
        Error::new(ErrorDetails::AppState {
            message: format!("Failed to build HTTP client: {e}"),
        })
    })
}

pub fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = Vec::new();
    let debug_origins: &[&str] = if config.debug { &DEBUG_ORIGINS } else { &[] };
    for origin in config
        .allowed_origins
        .iter()
        .map(String::as_str)
        .chain(debug_origins.iter().copied())
    {
        match HeaderValue::from_str(origin) {
            Ok(value) => origins.push(value),
            Err(e) => tracing::warn!("Ignoring invalid CORS origin `{origin}`: {e}"),
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-license-key")])
        .max_age(Duration::from_secs(86_400))
}

/// All gateway routes. Tracing and CORS layers are added by the binary.
pub fn build_router(app_state: AppStateData, metrics_handle: PrometheusHandle) -> Router {
    Router::new()
        .route(
            "/api/refine",
            post(endpoints::refine::refine_handler).get(endpoints::refine::describe_handler),
        )
        .route(
            "/api/groom",
            post(endpoints::fallback::groom_post_redirect)
                .get(endpoints::fallback::groom_get_redirect),
        )
        .route(
            "/api/telemetry",
            get(endpoints::telemetry::telemetry_handler),
        )
        .route("/status", get(endpoints::status::status_handler))
        .route("/health", get(endpoints::status::health_handler))
        .route(
            "/metrics",
            get(move || std::future::ready(metrics_handle.render())),
        )
        .fallback(endpoints::fallback::handle_404)
        .with_state(app_state)
}
