use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::accounts::AuthUser;
use crate::api::AppState;
use crate::error::ApiError;
use crate::watchlist::{self, AddOutcome, WatchlistItem};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub stock_ticker: String,
}

pub async fn list_watchlist(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<WatchlistItem>>, ApiError> {
    Ok(Json(watchlist::list(&state.db, user.id).await?))
}

/// 201 for a new entry, 200 when the ticker was already watched.
pub async fn add_to_watchlist(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<AddRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let outcome =
        watchlist::add(&state.db, user.id, user.effective_tier(), &req.stock_ticker).await?;
    Ok(match outcome {
        AddOutcome::Created(item) => (StatusCode::CREATED, Json(item)),
        AddOutcome::Existing(item) => (StatusCode::OK, Json(item)),
    })
}

pub async fn remove_from_watchlist(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ticker: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(ticker) = ticker?;
    watchlist::remove(&state.db, user.id, &ticker).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use common::types::SubscriptionTier;
    use serde_json::json;

    #[tokio::test]
    async fn test_free_tier_limit_and_idempotent_add() {
        let state = test_state(trading_hours()).await;
        let (token, _) = signup(&state, "awa@mail.ci").await;

        for ticker in ["SNTL", "BOAB", "ORAC"] {
            let (status, _) = send(
                &state,
                "POST",
                "/api/watchlist/my",
                Some(&token),
                Some(json!({"stockTicker": ticker})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, json) = send(
            &state,
            "POST",
            "/api/watchlist/my",
            Some(&token),
            Some(json!({"stockTicker": "SGBC"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "WATCHLIST_LIMIT_REACHED");
        assert_eq!(json["limit"], 3);
        assert_eq!(json["tier"], "free");

        let (status, json) = send(
            &state,
            "POST",
            "/api/watchlist/my",
            Some(&token),
            Some(json!({"stockTicker": "sntl"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stockTicker"], "SNTL");

        let (_, list) = send(&state, "GET", "/api/watchlist/my", Some(&token), None).await;
        let tickers: Vec<&str> = list
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["stockTicker"].as_str().unwrap())
            .collect();
        assert_eq!(tickers, vec!["BOAB", "ORAC", "SNTL"]);
    }

    #[tokio::test]
    async fn test_premium_and_admin_limits() {
        let state = test_state(trading_hours()).await;
        let (token, id) = signup(&state, "awa@mail.ci").await;
        crate::accounts::set_subscription_tier(&state.db, id, SubscriptionTier::Premium)
            .await
            .unwrap();
        for i in 0..15 {
            let (status, _) = send(
                &state,
                "POST",
                "/api/watchlist/my",
                Some(&token),
                Some(json!({"stockTicker": format!("T{i}")})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, json) = send(
            &state,
            "POST",
            "/api/watchlist/my",
            Some(&token),
            Some(json!({"stockTicker": "T15"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["limit"], 15);

        // Admins are never capped, whatever their stored tier.
        let (admin, _) = signup_admin(&state, "admin@afribourse.ci").await;
        for i in 0..5 {
            let (status, _) = send(
                &state,
                "POST",
                "/api/watchlist/my",
                Some(&admin),
                Some(json!({"stockTicker": format!("A{i}")})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn test_remove_and_missing() {
        let state = test_state(trading_hours()).await;
        let (token, _) = signup(&state, "awa@mail.ci").await;
        send(
            &state,
            "POST",
            "/api/watchlist/my",
            Some(&token),
            Some(json!({"stockTicker": "SNTL"})),
        )
        .await;

        let (status, _) = send(&state, "DELETE", "/api/watchlist/my/sntl", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, json) =
            send(&state, "DELETE", "/api/watchlist/my/SNTL", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "WATCHLIST_ITEM_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_blank_ticker_is_bad_request() {
        let state = test_state(trading_hours()).await;
        let (token, _) = signup(&state, "awa@mail.ci").await;
        let (status, json) = send(
            &state,
            "POST",
            "/api/watchlist/my",
            Some(&token),
            Some(json!({"stockTicker": "  "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_TICKER");
    }
}
