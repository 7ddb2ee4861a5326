//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{BasinQuery, ErrorResponse, ParameterQuery, ParameterResponse, StateResponse};
use crate::sim::types::BasinRecord;

fn bad_request(error: String) -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}

/// Returns configuration, lifecycle state, report and the latest records.
///
/// `GET /state` → 200 + `StateResponse` JSON
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let latest: Vec<BasinRecord> = match state.records.last() {
        Some(last) => state
            .records
            .iter()
            .filter(|r| r.time == last.time)
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    Json(StateResponse {
        config: state.config.clone(),
        state: state.state.to_string(),
        current_time: state.current_time,
        report: state.report.clone(),
        latest,
    })
}

/// Returns saved basin records, optionally filtered by time range and basin.
///
/// `GET /basin` → 200 + `Vec<BasinRecord>` JSON
/// `GET /basin?from=0&to=3600&basin_id=2` → filtered (inclusive)
/// `GET /basin?from=10&to=5` → 400 + `ErrorResponse`
pub async fn get_basin(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BasinQuery>,
) -> impl IntoResponse {
    let from = query.from.unwrap_or(f64::NEG_INFINITY);
    let to = query.to.unwrap_or(f64::INFINITY);

    if from > to {
        return Err(bad_request(format!("`from` ({from}) must be <= `to` ({to})")));
    }

    let records: Vec<BasinRecord> = state
        .records
        .iter()
        .filter(|r| r.time >= from && r.time <= to)
        .filter(|r| query.basin_id.is_none_or(|id| r.basin_id == id))
        .cloned()
        .collect();

    Ok(Json(records))
}

/// Returns the named parameter values in force at `time`.
///
/// `GET /parameters` → values at the snapshot time
/// `GET /parameters?time=-1` → 400 + `ErrorResponse` (before the first update)
pub async fn get_parameters(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ParameterQuery>,
) -> impl IntoResponse {
    let time = query.time.unwrap_or(state.current_time);
    let history = &state.parameter_history;
    let params = match history.query(time) {
        Ok(params) => params,
        Err(e) => return Err(bad_request(e.to_string())),
    };
    let idx = history.times().partition_point(|&t| t <= time);
    let updated_at = history.times()[..idx].last().copied().unwrap_or(time);

    Ok(Json(ParameterResponse {
        time,
        updated_at,
        values: params.named_values(),
    }))
}
