pub mod admin;
pub mod auth;
pub mod challenge;
pub mod middleware;
pub mod portfolios;
pub mod stocks;
pub mod watchlist;

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::challenge::window::TradingWindow;
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::db::Db;

/// Shared application state available to all handlers.
pub struct AppState {
    pub db: Db,
    pub config: Arc<AppConfig>,
    pub window: TradingWindow,
    pub clock: Clock,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/stocks", get(stocks::list_stocks))
        .route("/api/stocks/{ticker}", get(stocks::get_stock))
        .route("/api/challenge/info", get(challenge::info))
        .route("/api/challenge/leaderboard", get(challenge::leaderboard))
        .route("/api/challenge/statistics", get(challenge::statistics));

    // Route layers run outermost-last: the window gate sees the request
    // before the enrollment gate does.
    let trading = Router::new()
        .route("/api/portfolios/my/buy", post(portfolios::buy))
        .route("/api/portfolios/my/sell", post(portfolios::sell))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::concours_enrollment_gate,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::trading_window_gate,
        ));

    let enrolled = Router::new()
        .route("/api/challenge/accept-rules", post(challenge::accept_rules))
        .route("/api/challenge/my-rank", get(challenge::my_rank))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_enrollment,
        ));

    let admin = Router::new()
        .route(
            "/api/challenge/admin/ban/{user_id}",
            post(admin::ban_participant),
        )
        .route(
            "/api/challenge/admin/suspend/{user_id}",
            post(admin::suspend_participant),
        )
        .route(
            "/api/challenge/admin/unban/{user_id}",
            post(admin::unban_participant),
        )
        .route(
            "/api/challenge/admin/participants",
            get(admin::list_participants),
        )
        .route("/api/admin/stocks/{ticker}", put(admin::upsert_stock))
        .route(
            "/api/admin/users/{user_id}/subscription",
            put(admin::set_subscription),
        )
        .route_layer(axum::middleware::from_fn(middleware::require_admin));

    let protected = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/portfolios", get(portfolios::list_portfolios))
        .route(
            "/api/portfolios/my",
            get(portfolios::my_portfolio).post(portfolios::create_portfolio),
        )
        .route(
            "/api/portfolios/my/transactions",
            get(portfolios::transactions),
        )
        .route("/api/portfolios/my/history", get(portfolios::history))
        .route(
            "/api/watchlist/my",
            get(watchlist::list_watchlist).post(watchlist::add_to_watchlist),
        )
        .route(
            "/api/watchlist/my/{ticker}",
            delete(watchlist::remove_from_watchlist),
        )
        .route("/api/challenge/enroll", post(challenge::enroll))
        .route("/api/challenge/status", get(challenge::status))
        .merge(trading)
        .merge(enrolled)
        .merge(admin)
        .route_layer(from_fn_with_state(state.clone(), middleware::auth));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let Some(handle) = &state.metrics else {
        return StatusCode::NOT_FOUND.into_response();
    };
    handle.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
