use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::{NaiveDate, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::{Error, ErrorDetails};
use crate::gateway_util::{AppState, AppStateData};
use crate::telemetry::{DailySummary, MonthlySummary};

const ADMIN_KEY_HEADER: &str = "x-admin-key";

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryQuery {
    pub day: Option<String>,
    pub month: Option<String>,
}

fn authorize(app_state: &AppStateData, headers: &HeaderMap) -> Result<(), Error> {
    let provided = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match (&app_state.admin_api_key, provided) {
        (Some(expected), Some(provided)) if expected.expose_secret() == provided => Ok(()),
        _ => Err(Error::new(ErrorDetails::Unauthorized)),
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        Error::new(ErrorDetails::InvalidQuery {
            message: format!("`day` must be YYYY-MM-DD, got `{raw}`: {e}"),
        })
    })
}

fn parse_month(raw: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").map_err(|e| {
        Error::new(ErrorDetails::InvalidQuery {
            message: format!("`month` must be YYYY-MM, got `{raw}`: {e}"),
        })
    })
}

async fn daily(app_state: &AppStateData, day: NaiveDate) -> Option<DailySummary> {
    app_state
        .telemetry
        .daily_summary(day)
        .await
        .unwrap_or_else(|e| {
            warn!("Failed to read daily telemetry summary for {day}: {e}");
            None
        })
}

async fn monthly(app_state: &AppStateData, month: NaiveDate) -> Option<MonthlySummary> {
    app_state
        .telemetry
        .monthly_summary(month)
        .await
        .unwrap_or_else(|e| {
            warn!("Failed to read monthly telemetry summary for {month}: {e}");
            None
        })
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "message": message }))).into_response()
}

/// A handler for `GET /api/telemetry`
pub async fn telemetry_handler(
    State(app_state): AppState,
    headers: HeaderMap,
    Query(query): Query<TelemetryQuery>,
) -> Result<Response, Error> {
    authorize(&app_state, &headers)?;

    if let Some(raw) = query.day.as_deref() {
        let day = parse_day(raw)?;
        return Ok(match daily(&app_state, day).await {
            Some(summary) => Json(summary).into_response(),
            None => not_found("No data for this day"),
        });
    }
    if let Some(raw) = query.month.as_deref() {
        let month = parse_month(raw)?;
        return Ok(match monthly(&app_state, month).await {
            Some(summary) => Json(summary).into_response(),
            None => not_found("No data for this month"),
        });
    }

    let today = Utc::now().date_naive();
    let today_summary = daily(&app_state, today).await.unwrap_or_default();
    let month_summary = monthly(&app_state, today).await.unwrap_or_default();
    Ok(Json(json!({
        "today": today_summary,
        "month": month_summary,
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_dates() {
        assert_eq!(
            parse_day("2026-02-17").unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 17).unwrap()
        );
        assert_eq!(
            parse_month("2026-02").unwrap(),
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
        );
        for bad in ["2026-13-01", "yesterday", "2026/02/17"] {
            let err = parse_day(bad).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
        assert!(parse_month("2026-2-x").is_err());
    }

    mod router {
        use std::sync::Arc;

        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use chrono::Utc;

        use crate::telemetry::{test_event, RequestSource};
        use crate::testing::{send, test_app_state, MockCompletionService};
        use crate::tier::PlanTier;

        fn admin_get(uri: &str, key: Option<&str>) -> Request<Body> {
            let mut builder = Request::builder().uri(uri);
            if let Some(key) = key {
                builder = builder.header("x-admin-key", key);
            }
            builder.body(Body::empty()).unwrap()
        }

        #[tokio::test]
        async fn test_telemetry_requires_admin_key() {
            let state = test_app_state(Arc::new(MockCompletionService::new(vec![])));
            for key in [None, Some("wrong"), Some("")] {
                let (status, _, body) =
                    send(state.clone(), admin_get("/api/telemetry", key)).await;
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body["error"], "Unauthorized");
            }

            let mut state = state;
            state.admin_api_key = None;
            let (status, _, _) =
                send(state, admin_get("/api/telemetry", Some("admin-secret"))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        #[tokio::test]
        async fn test_telemetry_summaries() {
            let state = test_app_state(Arc::new(MockCompletionService::new(vec![])));
            let event = test_event(PlanTier::Free, RequestSource::Mcp);
            state.telemetry.record(&event).await.unwrap();
            let today = Utc::now().date_naive();

            let (status, _, body) =
                send(state.clone(), admin_get("/api/telemetry", Some("admin-secret"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["today"]["calls"], 1);
            assert_eq!(body["today"]["bySource"]["mcp"], 1);
            assert_eq!(body["month"]["items"], 3);

            let uri = format!("/api/telemetry?day={}", today.format("%Y-%m-%d"));
            let (status, _, body) =
                send(state.clone(), admin_get(&uri, Some("admin-secret"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["byTier"]["free"], 1);

            let uri = format!("/api/telemetry?month={}", today.format("%Y-%m"));
            let (status, _, body) =
                send(state.clone(), admin_get(&uri, Some("admin-secret"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["calls"], 1);
        }

        #[tokio::test]
        async fn test_telemetry_missing_data_and_bad_queries() {
            let state = test_app_state(Arc::new(MockCompletionService::new(vec![])));

            let (status, _, body) = send(
                state.clone(),
                admin_get("/api/telemetry?day=2020-01-01", Some("admin-secret")),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["message"], "No data for this day");

            let (status, _, body) = send(
                state.clone(),
                admin_get("/api/telemetry?month=2020-01", Some("admin-secret")),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["message"], "No data for this month");

            let (status, _, body) =
                send(state.clone(), admin_get("/api/telemetry", Some("admin-secret"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["today"]["calls"], 0);
            assert_eq!(body["month"]["calls"], 0);

            let (status, _, _) = send(
                state,
                admin_get("/api/telemetry?day=last-tuesday", Some("admin-secret")),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }
}
