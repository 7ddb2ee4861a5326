//! REST API over the results of a finished run.
//!
//! Provides three GET endpoints:
//! - `/state`: configuration, lifecycle state, balance report and latest storages
//! - `/basin`: saved basin records with optional time and basin filtering
//! - `/parameters`: the parameter snapshot in force at a given time

mod handlers;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::config::ScenarioConfig;
use crate::error::SimResult;
use crate::sim::engine::{Engine, EngineState};
use crate::sim::forcing::ForwardFill;
use crate::sim::params::ParameterVector;
use crate::sim::report::BalanceReport;
use crate::sim::types::BasinRecord;

pub use types::{BasinQuery, ErrorResponse, ParameterQuery, ParameterResponse, StateResponse};

/// Immutable application state shared across all request handlers.
///
/// Snapshotted once from the engine and wrapped in `Arc`; nothing is
/// mutated while serving.
pub struct AppState {
    /// Configuration of the run.
    pub config: ScenarioConfig,
    /// Engine lifecycle state at snapshot time.
    pub state: EngineState,
    /// Seconds since start at snapshot time.
    pub current_time: f64,
    /// Conservation report.
    pub report: BalanceReport,
    /// Saved basin records.
    pub records: Vec<BasinRecord>,
    /// Parameter snapshots, one per forcing update.
    pub parameter_history: ForwardFill<ParameterVector>,
}

impl AppState {
    /// Copies everything the API serves out of `engine`.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` for an engine without a run.
    pub fn from_engine(engine: &Engine) -> SimResult<Self> {
        Ok(Self {
            config: engine.config()?.clone(),
            state: engine.state(),
            current_time: engine.get_current_time()?,
            report: engine.report()?,
            records: engine.records()?.to_vec(),
            parameter_history: engine.parameter_history()?.clone(),
        })
    }
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/basin", get(handlers::get_basin))
        .route("/parameters", get(handlers::get_parameters))
        .with_state(state)
}

/// Binds to the given address and serves the API.
///
/// # Panics
///
/// Panics if the TCP listener cannot bind to `addr`.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {addr}: {e}"));
    log::info!("API server listening on http://{addr}");
    axum::serve(listener, app)
        .await
        .unwrap_or_else(|e| panic!("server error: {e}"));
}
