//! Client for the Refine Backlog HTTP API, plus the pieces of the
//! `refine-backlog-mcp` stdio server.

use std::time::Duration;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

mod error;
pub mod format;
pub mod mcp;

pub use error::ClientError;
pub use format::{format_refined_items, format_response};

pub const DEFAULT_BASE_URL: &str = "https://refinebacklog.com";
pub const PRICING_URL: &str = "https://refinebacklog.com/pricing";

const LICENSE_KEY_HEADER: &str = "x-license-key";
const SOURCE_HEADER: &str = "x-source";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_user_stories: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_gherkin: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefinedItem {
    pub title: String,
    pub problem: String,
    pub acceptance_criteria: Vec<String>,
    pub estimate: String,
    pub priority: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub assumptions: Option<Vec<String>>,
    #[serde(default)]
    pub user_story: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefineMeta {
    pub request_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub tier: String,
    #[serde(default)]
    pub retried: bool,
    #[serde(default)]
    pub prompt_version: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct RefineResponse {
    pub items: Vec<RefinedItem>,
    /// Older deployments answer with `_meta`.
    #[serde(alias = "_meta")]
    pub meta: RefineMeta,
}

/// The error body returned by the gateway for every non-2xx answer.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    upgrade: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefineClient {
    http: reqwest::Client,
    endpoint: Url,
    license_key: Option<SecretString>,
}

impl RefineClient {
    /// `license_key` is the fallback key, used when a call does not carry its own.
    pub fn new(base_url: &Url, license_key: Option<SecretString>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: base_url.join("/api/refine")?,
            license_key,
        })
    }

    pub async fn refine(
        &self,
        request: &RefineRequest,
        license_key: Option<&str>,
    ) -> Result<RefineResponse, ClientError> {
        let key = license_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.license_key.as_ref().map(|key| key.expose_secret()));

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header(SOURCE_HEADER, "mcp")
            .json(request);
        if let Some(key) = key {
            builder = builder.header(LICENSE_KEY_HEADER, key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<RefineResponse>().await?);
        }

        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        tracing::debug!(%status, "Refine request rejected: {:?}", body.error);
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited {
                message: body
                    .error
                    .unwrap_or_else(|| "Daily request limit reached on the free tier.".to_string()),
                upgrade: body.upgrade,
            },
            StatusCode::SERVICE_UNAVAILABLE => ClientError::Unavailable,
            _ => ClientError::Rejected {
                status: status.as_u16(),
                message: body.error.unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Unknown error")
                        .to_string()
                }),
                upgrade: body.upgrade,
            },
        })
    }
}
