use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, Query, State},
    Extension, Json,
};
use common::types::SubscriptionTier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::accounts::{self, AuthUser};
use crate::api::AppState;
use crate::challenge::{self, ChallengeStatus, ModerationAction, ParticipantPage};
use crate::error::ApiError;
use crate::stocks::{self, Stock};

const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Deserialize)]
pub struct BanRequest {
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub name: Option<String>,
    pub current_price: f64,
}

#[derive(Deserialize)]
pub struct SubscriptionUpdate {
    pub tier: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub user_id: i64,
    pub subscription_tier: SubscriptionTier,
}

async fn moderate(
    state: &AppState,
    admin: &AuthUser,
    user_id: i64,
    action: ModerationAction,
) -> Result<Json<ChallengeStatus>, ApiError> {
    let label = match &action {
        ModerationAction::Ban { .. } => "ban",
        ModerationAction::Suspend => "suspend",
        ModerationAction::Unban => "unban",
    };
    let status = challenge::set_standing(&state.db, user_id, action).await?;
    info!(admin_id = admin.id, user_id, action = label, "participant moderated");
    Ok(Json(status))
}

pub async fn ban_participant(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<BanRequest>, JsonRejection>,
) -> Result<Json<ChallengeStatus>, ApiError> {
    let Path(user_id) = user_id?;
    let Json(req) = payload?;
    let reason = req.reason.unwrap_or_default();
    moderate(&state, &admin, user_id, ModerationAction::Ban { reason }).await
}

pub async fn suspend_participant(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ChallengeStatus>, ApiError> {
    let Path(user_id) = user_id?;
    moderate(&state, &admin, user_id, ModerationAction::Suspend).await
}

pub async fn unban_participant(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ChallengeStatus>, ApiError> {
    let Path(user_id) = user_id?;
    moderate(&state, &admin, user_id, ModerationAction::Unban).await
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ParticipantPage>, ApiError> {
    let page = query
        .page
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(1);
    let limit = query
        .limit
        .and_then(|l| l.trim().parse::<u32>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(challenge::participants(&state.db, page, limit).await?))
}

pub async fn upsert_stock(
    State(state): State<Arc<AppState>>,
    ticker: Result<Path<String>, PathRejection>,
    payload: Result<Json<StockUpdate>, JsonRejection>,
) -> Result<Json<Stock>, ApiError> {
    let Path(ticker) = ticker?;
    let Json(update) = payload?;
    let stock = stocks::upsert(&state.db, &ticker, update.name, update.current_price).await?;
    info!(ticker = %stock.ticker, price = stock.current_price, "reference price updated");
    Ok(Json(stock))
}

pub async fn set_subscription(
    State(state): State<Arc<AppState>>,
    Extension(admin): Extension<AuthUser>,
    user_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SubscriptionUpdate>, JsonRejection>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let Path(user_id) = user_id?;
    let Json(update) = payload?;
    let tier = SubscriptionTier::from_str_loose(&update.tier).ok_or_else(|| {
        ApiError::bad_request(
            "INVALID_TIER",
            format!("tier must be free, premium, pro or max, got {:?}", update.tier),
        )
    })?;
    accounts::set_subscription_tier(&state.db, user_id, tier).await?;
    info!(admin_id = admin.id, user_id, tier = %tier, "subscription tier changed");
    Ok(Json(SubscriptionResponse {
        user_id,
        subscription_tier: tier,
    }))
}
