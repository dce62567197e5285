//! Axum router for the admin HTTP boundary (spec §6.4).
//!
//! Handlers are thin: decode/validate the request, delegate to `ldr-db`, map
//! the result to a response. Nothing here runs inside the scheduler's own
//! transactions — every admin write takes its own short row lock via the
//! `ldr-db::entities` functions it calls.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use ldr_schemas::PurgeStrategy;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api_types::{
    AdjustTimestampRequest, ErrorResponse, HealthResponse, HistoryQueryParams, LoadHistoryResponse,
    LoaderPatchRequest, LoaderResponse, OkResponse, StatusResponse,
};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/loaders/:code", get(get_loader).patch(patch_loader))
        .route("/v1/loaders/:code/pause", post(pause_loader))
        .route("/v1/loaders/:code/resume", post(resume_loader))
        .route("/v1/loaders/:code/adjust-timestamp", post(adjust_timestamp))
        .route("/v1/history", get(get_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        service: "ldr-daemon",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) async fn status(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        ok: true,
        service: st.build.service,
        version: st.build.version,
        uptime_secs: st.uptime_secs(),
        replica_name: st.replica_name.clone(),
    })
}

fn not_found(loader_code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(format!("loader not found: {loader_code}"))),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!(error = %err, "admin request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::new(err.to_string())))
}

pub(crate) async fn get_loader(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match ldr_db::entities::fetch_by_code(&st.pool, &code).await {
        Ok(Some(loader)) => Json(LoaderResponse::from(&loader)).into_response(),
        Ok(None) => not_found(&code).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub(crate) async fn patch_loader(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<LoaderPatchRequest>,
) -> impl IntoResponse {
    let purge_strategy = match body.purge_strategy.as_deref().map(PurgeStrategy::parse) {
        Some(None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid purgeStrategy")),
            )
                .into_response()
        }
        Some(Some(p)) => Some(p),
        None => None,
    };

    let loader_sql_encrypted = match body.loader_sql {
        Some(plaintext) => match st.encryption.encrypt(&plaintext) {
            Ok(ciphertext) => Some(ciphertext),
            Err(err) => return internal_error(err).into_response(),
        },
        None => None,
    };

    let patch = ldr_db::entities::LoaderDefinitionPatch {
        loader_sql_encrypted,
        min_interval_seconds: body.min_interval_seconds,
        max_interval_seconds: body.max_interval_seconds,
        max_query_period_seconds: body.max_query_period_seconds,
        max_parallel_executions: body.max_parallel_executions,
        source_timezone_offset_hours: body.source_timezone_offset_hours,
        aggregation_period_seconds: body.aggregation_period_seconds,
        purge_strategy,
    };

    match ldr_db::entities::update_definition(&st.pool, &code, &patch).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(err) if err.to_string().contains("loader not found") => not_found(&code).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub(crate) async fn pause_loader(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match ldr_db::entities::pause(&st.pool, &code).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(err) if err.to_string().contains("loader not found") => not_found(&code).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub(crate) async fn resume_loader(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    match ldr_db::entities::resume(&st.pool, &code).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(err) if err.to_string().contains("loader not found") => not_found(&code).into_response(),
        Err(err) if err.to_string().contains("resume rejected") => {
            (StatusCode::CONFLICT, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
        Err(err) => internal_error(err).into_response(),
    }
}

pub(crate) async fn adjust_timestamp(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<AdjustTimestampRequest>,
) -> impl IntoResponse {
    match ldr_db::entities::adjust_timestamp(&st.pool, &code, body.timestamp).await {
        Ok(()) => Json(OkResponse { ok: true }).into_response(),
        Err(err) if err.to_string().contains("loader not found") => not_found(&code).into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}

pub(crate) async fn get_history(
    State(st): State<Arc<AppState>>,
    Query(params): Query<HistoryQueryParams>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(ldr_schemas::HistoryStatus::parse) {
        Some(None) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new("invalid status"))).into_response()
        }
        Some(Some(s)) => Some(s),
        None => None,
    };

    let query = ldr_db::history::HistoryQuery {
        loader_code: params.loader_code,
        status,
        from_time: params.from_time,
        to_time: params.to_time,
        limit: params.limit.unwrap_or(100),
    };

    match ldr_db::history::query_history(&st.pool, &query).await {
        Ok(rows) => {
            let body: Vec<LoadHistoryResponse> = rows.iter().map(LoadHistoryResponse::from).collect();
            Json(body).into_response()
        }
        Err(err) => internal_error(err).into_response(),
    }
}
