use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::accounts::AuthUser;
use crate::api::AppState;
use crate::challenge::leaderboard::{self, LeaderboardEntry, Statistics, UserRank};
use crate::challenge::{self, ChallengeInfo, ChallengeStatus, EnrollmentForm};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<String>,
}

#[derive(Serialize)]
struct EnrolledStatus {
    enrolled: bool,
    #[serde(flatten)]
    status: ChallengeStatus,
}

pub async fn info(State(state): State<Arc<AppState>>) -> Json<ChallengeInfo> {
    Json(challenge::info(
        &state.config.challenge,
        &state.window,
        state.clock.now(),
    ))
}

/// Unparseable limits fall back to the default.
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let limit = query.limit.and_then(|l| l.trim().parse::<usize>().ok());
    Ok(Json(leaderboard::leaderboard(&state.db, limit).await?))
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> Result<Json<Statistics>, ApiError> {
    Ok(Json(leaderboard::statistics(&state.db).await?))
}

pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<EnrollmentForm>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(form) = payload?;
    let config = &state.config.challenge;
    let enrollment = challenge::enroll(
        &state.db,
        user.id,
        form,
        config.name.clone(),
        config.initial_balance,
    )
    .await?;
    info!(
        user_id = user.id,
        wallet_id = enrollment.wallet.id,
        "enrolled in challenge"
    );
    Ok((StatusCode::CREATED, Json(enrollment)))
}

pub async fn accept_rules(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ChallengeStatus>, ApiError> {
    let status = challenge::accept_rules(&state.db, user.id).await?;
    info!(user_id = user.id, "challenge rules accepted");
    Ok(Json(status))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let body = match challenge::status(&state.db, user.id).await? {
        None => json!({ "enrolled": false }),
        Some(status) => serde_json::to_value(EnrolledStatus {
            enrolled: true,
            status,
        })
        .map_err(|e| {
            tracing::error!(error = %e, "failed to serialize challenge status");
            ApiError::internal()
        })?,
    };
    Ok(Json(body))
}

pub async fn my_rank(
    State(state): State<Arc<AppState>>,
    Extension(status): Extension<ChallengeStatus>,
) -> Result<Json<UserRank>, ApiError> {
    Ok(Json(leaderboard::user_rank(&state.db, status.user_id).await?))
}
