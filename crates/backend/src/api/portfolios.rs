use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::types::{Side, WalletType};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::accounts::AuthUser;
use crate::api::middleware::{ResolvedWallet, WalletQuery};
use crate::api::AppState;
use crate::challenge;
use crate::error::ApiError;
use crate::metrics::record_trade;
use crate::portfolio::{self, HistoryPoint, PortfolioDetail, TradeOrder, TradeOutcome, TransactionRecord};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePortfolioRequest {
    pub name: Option<String>,
    pub initial_balance: Option<f64>,
}

pub async fn list_portfolios(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<PortfolioDetail>>, ApiError> {
    Ok(Json(portfolio::list_portfolios(&state.db, user.id).await?))
}

pub async fn my_portfolio(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<PortfolioDetail>, ApiError> {
    let wallet = query.resolve()?;
    Ok(Json(portfolio::get_portfolio(&state.db, user.id, wallet).await?))
}

/// Create the SANDBOX wallet. The body is optional.
pub async fn create_portfolio(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreatePortfolioRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreatePortfolioRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request("INVALID_BODY", e.to_string()))?
    };

    let defaults = &state.config.portfolio;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| defaults.sandbox_name.clone());
    let balance = req
        .initial_balance
        .unwrap_or(defaults.sandbox_initial_balance);

    let detail = portfolio::create_sandbox(&state.db, user.id, name, balance).await?;
    info!(user_id = user.id, portfolio_id = detail.portfolio.id, "sandbox portfolio created");
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn trade(
    state: &AppState,
    user: &AuthUser,
    wallet: WalletType,
    side: Side,
    order: TradeOrder,
) -> Result<TradeOutcome, ApiError> {
    let outcome = portfolio::execute_trade(&state.db, user.id, wallet, side, order).await?;
    record_trade(side, wallet);
    info!(
        user_id = user.id,
        wallet = %wallet,
        side = %side,
        ticker = %outcome.transaction.stock_ticker,
        quantity = outcome.transaction.quantity,
        price = outcome.transaction.price_per_share,
        "trade executed"
    );

    if wallet == WalletType::Concours {
        let required = state.config.challenge.required_unique_tickers;
        if let Err(e) = challenge::refresh_eligibility(&state.db, user.id, required).await {
            // The trade is committed; eligibility catches up on the next one.
            warn!(user_id = user.id, error = %e, "failed to refresh challenge eligibility");
        }
    }
    Ok(outcome)
}

pub async fn buy(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Extension(ResolvedWallet(wallet)): Extension<ResolvedWallet>,
    payload: Result<Json<TradeOrder>, JsonRejection>,
) -> Result<Json<TradeOutcome>, ApiError> {
    let Json(order) = payload?;
    Ok(Json(trade(&state, &user, wallet, Side::Buy, order).await?))
}

pub async fn sell(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Extension(ResolvedWallet(wallet)): Extension<ResolvedWallet>,
    payload: Result<Json<TradeOrder>, JsonRejection>,
) -> Result<Json<TradeOutcome>, ApiError> {
    let Json(order) = payload?;
    Ok(Json(trade(&state, &user, wallet, Side::Sell, order).await?))
}

pub async fn transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<Vec<TransactionRecord>>, ApiError> {
    let wallet = query.resolve()?;
    Ok(Json(portfolio::transactions(&state.db, user.id, wallet).await?))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<Vec<HistoryPoint>>, ApiError> {
    let wallet = query.resolve()?;
    let today = state.clock.now().date_naive();
    Ok(Json(portfolio::history(&state.db, user.id, wallet, today).await?))
}
