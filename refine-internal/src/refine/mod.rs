//! Backlog refinement: request validation, prompt rendering and the
//! validate-then-retry model call.

pub mod pipeline;
pub mod prompt;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, ErrorDetails};
use crate::tier::PlanTier;

pub use pipeline::{refine_items, RefineFailure, RefineOutcome, SamplingSettings};
pub use prompt::{PromptInput, PromptTemplates, PROMPT_VERSION};
pub use schema::{Estimate, Priority, PriorityLevel, RefinedItem};

/// Body of `POST /api/refine`.
///
/// `items` stays untyped so that missing, non-array and non-string entries
/// all produce the same client-facing message.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineParams {
    #[serde(default)]
    pub items: Option<Value>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub use_user_stories: bool,
    #[serde(default)]
    pub use_gherkin: bool,
}

/// Returns the trimmed, non-blank items in their original order.
pub fn normalize_items(items: Option<&Value>) -> Result<Vec<String>, Error> {
    let entries = match items {
        Some(Value::Array(entries)) if !entries.is_empty() => entries,
        _ => return Err(Error::new(ErrorDetails::MissingItems)),
    };
    let mut normalized = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(text) = entry.as_str() else {
            return Err(Error::new(ErrorDetails::MissingItems));
        };
        let text = text.trim();
        if !text.is_empty() {
            normalized.push(text.to_string());
        }
    }
    if normalized.is_empty() {
        return Err(Error::new(ErrorDetails::AllItemsEmpty));
    }
    Ok(normalized)
}

/// Rejects lists above the tier ceiling. Only the free tier is pointed at an
/// upgrade.
pub fn enforce_item_ceiling(
    mut items: Vec<String>,
    tier: PlanTier,
    upgrade_url: &str,
) -> Result<Vec<String>, Error> {
    let allowed = tier.max_items();
    if items.len() > allowed {
        return Err(Error::new(ErrorDetails::ItemLimitExceeded {
            tier,
            received: items.len(),
            allowed,
            upgrade: tier.is_free().then(|| upgrade_url.to_string()),
        }));
    }
    items.truncate(allowed);
    Ok(items)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineMeta {
    pub request_id: Uuid,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub prompt_version: &'static str,
    pub tier: PlanTier,
    pub retried: bool,
}

#[derive(Debug, Serialize)]
pub struct RefineResponse {
    pub items: Vec<RefinedItem>,
    pub meta: RefineMeta,
}
