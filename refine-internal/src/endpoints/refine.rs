use std::time::Instant;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::{json, Map, Value};
use strum::IntoEnumIterator;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entitlement::resolve_tier;
use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::rate_limit::{client_identifier, RateLimitHeaders};
use crate::refine::{
    enforce_item_ceiling, normalize_items, refine_items, PromptInput, RefineMeta, RefineParams,
    RefineResponse, PROMPT_VERSION,
};
use crate::telemetry::{anonymize_client, RequestSource, UsageEvent};
use crate::tier::PlanTier;

const LICENSE_KEY_HEADER: &str = "x-license-key";

/// A handler for `POST /api/refine`
#[instrument(name = "refine", skip_all)]
pub async fn refine_handler(
    State(app_state): AppState,
    headers: HeaderMap,
    StructuredJson(params): StructuredJson<RefineParams>,
) -> Response {
    let mut rate_headers = None;
    let result = refine(&app_state, &headers, params, &mut rate_headers).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => outcome_label(e.get_details()),
    };
    metrics::counter!("refine_requests_total", "outcome" => outcome).increment(1);

    let mut response = match result {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(),
    };
    if let Some(rate_headers) = rate_headers {
        response.headers_mut().extend(rate_headers.to_header_map());
    }
    response
}

fn outcome_label(details: &ErrorDetails) -> &'static str {
    match details {
        ErrorDetails::MissingItems | ErrorDetails::AllItemsEmpty | ErrorDetails::JsonRequest { .. } => {
            "invalid_request"
        }
        ErrorDetails::DailyLimitReached { .. } => "rate_limited",
        ErrorDetails::ItemLimitExceeded { .. } => "item_limit",
        ErrorDetails::CompletionUnavailable { .. } => "upstream_unavailable",
        ErrorDetails::ModelOutputParse { .. } | ErrorDetails::ModelOutputValidation { .. } => {
            "upstream_invalid"
        }
        _ => "error",
    }
}

/// The body key wins over the header.
fn license_key<'a>(params: &'a RefineParams, headers: &'a HeaderMap) -> Option<&'a str> {
    let non_blank = |key: &'a str| Some(key.trim()).filter(|k| !k.is_empty());
    params
        .license_key
        .as_deref()
        .and_then(non_blank)
        .or_else(|| {
            headers
                .get(LICENSE_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(non_blank)
        })
}

async fn refine(
    app_state: &AppStateData,
    headers: &HeaderMap,
    params: RefineParams,
    rate_headers: &mut Option<RateLimitHeaders>,
) -> Result<RefineResponse, Error> {
    let started = Instant::now();
    let config = &app_state.config;

    let items = normalize_items(params.items.as_ref())?;

    let tier = resolve_tier(app_state.licenses.as_ref(), license_key(&params, headers)).await;
    let client_id = client_identifier(headers);
    let decision = app_state.rate_limiter.check(&client_id, tier).await;
    rate_headers.clone_from(&decision.headers);
    if !decision.is_allowed() {
        return Err(Error::new(ErrorDetails::DailyLimitReached {
            tier,
            limit: decision.limit.unwrap_or_default(),
            upgrade: tier
                .is_free()
                .then(|| config.gateway.upgrade_url.clone()),
        }));
    }

    let items = enforce_item_ceiling(items, tier, &config.gateway.upgrade_url)?;

    let input = PromptInput {
        items: &items,
        context: params.context.as_deref(),
        use_user_stories: params.use_user_stories,
        use_gherkin: params.use_gherkin,
    };
    let result = refine_items(
        app_state.completion.as_ref(),
        &app_state.prompts,
        &input,
        config.model.sampling(),
    )
    .await;

    let usage = Usage {
        tier,
        item_count: items.len(),
        client_id: &client_id,
        started,
    };
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(failure) => {
            // Tokens were spent on both attempts, so a failed retry still counts as a call.
            if failure.retried {
                record_usage(
                    app_state,
                    headers,
                    &usage,
                    failure.input_tokens,
                    failure.output_tokens,
                    true,
                );
            }
            return Err(failure.error);
        }
    };

    let recorded = record_usage(
        app_state,
        headers,
        &usage,
        outcome.input_tokens,
        outcome.output_tokens,
        outcome.retried,
    );
    let RecordedUsage {
        request_id,
        model,
        cost_usd,
        latency_ms,
    } = recorded;

    info!(
        %request_id,
        %tier,
        items = items.len(),
        retried = outcome.retried,
        latency_ms,
        cost_usd,
        "Refined backlog items"
    );

    Ok(RefineResponse {
        items: outcome.items,
        meta: RefineMeta {
            request_id,
            model,
            input_tokens: outcome.input_tokens,
            output_tokens: outcome.output_tokens,
            cost_usd,
            latency_ms,
            prompt_version: PROMPT_VERSION,
            tier,
            retried: outcome.retried,
        },
    })
}

struct Usage<'a> {
    tier: PlanTier,
    item_count: usize,
    client_id: &'a str,
    started: Instant,
}

struct RecordedUsage {
    request_id: Uuid,
    model: String,
    cost_usd: f64,
    latency_ms: u64,
}

/// Prices the call, updates the retry and cost metrics and queues a `UsageEvent`.
fn record_usage(
    app_state: &AppStateData,
    headers: &HeaderMap,
    usage: &Usage<'_>,
    input_tokens: u64,
    output_tokens: u64,
    retried: bool,
) -> RecordedUsage {
    let model = app_state.completion.model_name().to_string();
    let cost_usd = app_state
        .pricing
        .cost_usd(&model, input_tokens, output_tokens);
    let latency_ms = u64::try_from(usage.started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let request_id = Uuid::now_v7();

    if retried {
        metrics::counter!("refine_retries_total").increment(1);
    }
    metrics::gauge!("refine_llm_cost_usd_total").increment(cost_usd);

    app_state.recorder.try_send(UsageEvent {
        request_id,
        timestamp: Utc::now(),
        model: model.clone(),
        tier: usage.tier,
        item_count: usage.item_count,
        input_tokens,
        output_tokens,
        cost_usd,
        latency_ms,
        retried,
        client_hash: anonymize_client(usage.client_id),
        source: RequestSource::detect(headers),
    });

    RecordedUsage {
        request_id,
        model,
        cost_usd,
        latency_ms,
    }
}

/// A handler for `GET /api/refine`: a short description of the API.
pub async fn describe_handler() -> Json<Value> {
    let tiers: Map<String, Value> = PlanTier::iter()
        .map(|tier| (tier.to_string(), json!(tier.limits())))
        .collect();
    Json(json!({
        "message": "Refine Backlog API",
        "usage": "POST /api/refine with { items: string[], context?: string, licenseKey?: string, useUserStories?: boolean, useGherkin?: boolean }",
        "tiers": tiers,
    }))
}
