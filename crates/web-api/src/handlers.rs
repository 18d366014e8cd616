//! HTTP handlers for the screener, alert CRUD, and market data routes.
//!
//! Error discipline: validation problems come back as structured issue
//! arrays; compilation and execution failures are logged server-side
//! with the privileged detail (full DSL, compiled SQL) and surface to
//! the client as generic envelopes. SQL, schema names, and stack traces
//! never leave the process.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info};
use uuid::Uuid;

use screener_compiler::{QueryCompiler, Validator};
use screener_core::catalog::FieldCatalog;
use screener_data::models::{AlertUpdate, NewAlert};
use screener_data::repositories::Repositories;
use screener_translator::QueryTranslator;

/// Shared state for all routes. Built once at startup; the catalog and
/// the pipeline components are read-only and safe for concurrent use.
pub struct AppState {
    pub catalog: Arc<FieldCatalog>,
    pub translator: QueryTranslator,
    pub validator: Validator,
    pub compiler: QueryCompiler,
    pub repos: Repositories,
}

/// Request/session correlation pulled from headers and echoed back in
/// every response's metadata.
struct Correlation {
    request_id: String,
    session_id: Option<String>,
}

fn correlation(headers: &HeaderMap) -> Correlation {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    Correlation {
        request_id,
        session_id,
    }
}

fn metadata_json(correlation: &Correlation) -> JsonValue {
    match &correlation.session_id {
        Some(session_id) => json!({
            "request_id": correlation.request_id,
            "session_id": session_id,
        }),
        None => json!({"request_id": correlation.request_id}),
    }
}

fn error_envelope(
    status: StatusCode,
    code: &str,
    message: &str,
    details: Option<JsonValue>,
    correlation: &Correlation,
) -> (StatusCode, Json<JsonValue>) {
    let mut error = json!({"code": code, "message": message});
    if let Some(details) = details {
        error["details"] = details;
    }
    (
        status,
        Json(json!({
            "success": false,
            "error": error,
            "metadata": metadata_json(correlation),
        })),
    )
}

// ----------------------------------------------------------------------
// Screener
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ScreenerRequest {
    pub query: Option<String>,
    pub dsl: Option<JsonValue>,
}

/// Runs a screen from either a natural-language query or a DSL tree.
pub async fn run_screener(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ScreenerRequest>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    let started = Instant::now();

    let original_query = request.query.clone();
    let raw_dsl = match (request.dsl, request.query.as_deref()) {
        (Some(dsl), _) => dsl,
        (None, Some(query)) => {
            let rule = state.translator.translate(query);
            serde_json::to_value(rule).unwrap_or_else(|_| json!({"filter": {}}))
        }
        (None, None) => {
            return error_envelope(
                StatusCode::BAD_REQUEST,
                "UNPARSEABLE",
                "provide either 'query' or 'dsl'",
                None,
                &correlation,
            )
        }
    };

    let validated = match state.validator.validate(&raw_dsl) {
        Ok(validated) => validated,
        Err(report) => {
            return error_envelope(
                StatusCode::BAD_REQUEST,
                "VALIDATION",
                "the screen failed validation",
                serde_json::to_value(&report.issues).ok(),
                &correlation,
            )
        }
    };

    let compiled = match state.compiler.compile(&validated.rule) {
        Ok(compiled) => compiled,
        Err(e) => {
            error!(
                request_id = %correlation.request_id,
                dsl = %raw_dsl,
                error = %e,
                "Screen compilation failed"
            );
            return error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMPILATION",
                "the screen could not be compiled",
                None,
                &correlation,
            );
        }
    };

    let hits = match state.repos.screener.run(&compiled).await {
        Ok(hits) => hits,
        Err(e) => {
            // Privileged log: the compiled SQL stays server-side.
            error!(
                request_id = %correlation.request_id,
                sql = %compiled.sql,
                error = %e,
                "Screen execution failed"
            );
            return error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "the screen could not be executed",
                None,
                &correlation,
            );
        }
    };

    info!(
        request_id = %correlation.request_id,
        results = hits.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Screen executed"
    );

    let count = hits.len();
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "results": hits,
            "count": count,
            "execution": {"time_ms": started.elapsed().as_millis() as u64},
            "query": {
                "original": original_query,
                "dsl": validated.rule,
                "warnings": validated.warnings,
            },
            "metadata": metadata_json(&correlation),
        })),
    )
}

/// Lists the screenable fields so clients can build rule editors
/// without hardcoding the catalog.
pub async fn list_fields(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    let fields: Vec<JsonValue> = state
        .catalog
        .fields()
        .iter()
        .map(|field| {
            json!({
                "name": field.name,
                "kind": field.kind,
                "time_series": field.time_series,
                "sortable": field.sortable,
                "aliases": field.aliases,
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "results": fields,
            "metadata": metadata_json(&correlation),
        })),
    )
}

// ----------------------------------------------------------------------
// Alert CRUD
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserScope {
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListAlertsParams {
    pub user_id: i64,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListAlertsParams>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    match state.repos.alerts.list_for_user(params.user_id).await {
        Ok(alerts) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": alerts,
                "metadata": metadata_json(&correlation),
            })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to list alerts");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not load alerts",
                None,
                &correlation,
            )
        }
    }
}

const ALERT_KINDS: &[&str] = &[
    "price_threshold",
    "price_change",
    "fundamental",
    "event",
    "technical",
    "custom_dsl",
];

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new_alert): Json<NewAlert>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);

    if !ALERT_KINDS.contains(&new_alert.kind.as_str()) {
        return error_envelope(
            StatusCode::BAD_REQUEST,
            "VALIDATION",
            &format!("unknown alert kind: {}", new_alert.kind),
            None,
            &correlation,
        );
    }

    match state.repos.alerts.create(&new_alert).await {
        Ok(alert) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "data": alert,
                "metadata": metadata_json(&correlation),
            })),
        ),
        Err(e) => {
            error!(error = %e, "Failed to create alert");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not create the alert",
                None,
                &correlation,
            )
        }
    }
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(scope): Query<UserScope>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    match state.repos.alerts.get(id).await {
        Ok(Some(alert)) => {
            if scope.user_id.is_some_and(|user| user != alert.user_id) {
                return error_envelope(
                    StatusCode::FORBIDDEN,
                    "FORBIDDEN",
                    "alert belongs to another user",
                    None,
                    &correlation,
                );
            }
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "data": alert,
                    "metadata": metadata_json(&correlation),
                })),
            )
        }
        Ok(None) => error_envelope(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "alert not found",
            None,
            &correlation,
        ),
        Err(e) => {
            error!(error = %e, "Failed to fetch alert");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not load the alert",
                None,
                &correlation,
            )
        }
    }
}

pub async fn update_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(update): Json<AlertUpdate>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    match state.repos.alerts.update(id, &update).await {
        Ok(Some(alert)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": alert,
                "metadata": metadata_json(&correlation),
            })),
        ),
        Ok(None) => error_envelope(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "alert not found",
            None,
            &correlation,
        ),
        Err(e) => {
            error!(error = %e, "Failed to update alert");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not update the alert",
                None,
                &correlation,
            )
        }
    }
}

pub async fn delete_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    match state.repos.alerts.delete(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {"deleted": id},
                "metadata": metadata_json(&correlation),
            })),
        ),
        Ok(false) => error_envelope(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "alert not found",
            None,
            &correlation,
        ),
        Err(e) => {
            error!(error = %e, "Failed to delete alert");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not delete the alert",
                None,
                &correlation,
            )
        }
    }
}

// ----------------------------------------------------------------------
// Market data
// ----------------------------------------------------------------------

pub async fn get_quote(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(ticker): Path<String>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    match state.repos.market.latest_quote(&ticker).await {
        Ok(Some(quote)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "results": quote,
                "metadata": metadata_json(&correlation),
            })),
        ),
        Ok(None) => error_envelope(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "no price history for this ticker",
            None,
            &correlation,
        ),
        Err(e) => {
            error!(ticker = %ticker, error = %e, "Quote fetch failed");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not load the quote",
                None,
                &correlation,
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MoversParams {
    pub limit: Option<i64>,
}

pub async fn get_movers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<MoversParams>,
) -> (StatusCode, Json<JsonValue>) {
    let correlation = correlation(&headers);
    let limit = params.limit.unwrap_or(10).clamp(1, 100);
    match state.repos.market.top_movers(limit).await {
        Ok(movers) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "results": movers,
                "metadata": metadata_json(&correlation),
            })),
        ),
        Err(e) => {
            error!(error = %e, "Top movers fetch failed");
            error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION",
                "could not load top movers",
                None,
                &correlation,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_generates_a_request_id_when_absent() {
        let headers = HeaderMap::new();
        let c = correlation(&headers);
        assert!(!c.request_id.is_empty());
        assert!(c.session_id.is_none());
    }

    #[test]
    fn correlation_echoes_incoming_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-42".parse().unwrap());
        headers.insert("x-session-id", "sess-7".parse().unwrap());
        let c = correlation(&headers);
        assert_eq!(c.request_id, "req-42");
        assert_eq!(c.session_id.as_deref(), Some("sess-7"));

        let meta = metadata_json(&c);
        assert_eq!(meta["request_id"], "req-42");
        assert_eq!(meta["session_id"], "sess-7");
    }

    #[test]
    fn error_envelope_shape() {
        let c = Correlation {
            request_id: "r".to_string(),
            session_id: None,
        };
        let (status, Json(body)) = error_envelope(
            StatusCode::BAD_REQUEST,
            "VALIDATION",
            "bad screen",
            Some(json!([{"path": "filter"}])),
            &c,
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION");
        assert!(body["error"]["details"].is_array());
    }

    #[test]
    fn alert_kind_whitelist() {
        assert!(ALERT_KINDS.contains(&"price_threshold"));
        assert!(!ALERT_KINDS.contains(&"price_drop"));
    }
}
