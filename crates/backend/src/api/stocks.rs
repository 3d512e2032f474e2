use axum::{
    extract::{rejection::PathRejection, Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::AppState;
use crate::error::ApiError;
use crate::stocks::{self, Stock};

pub async fn list_stocks(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Stock>>, ApiError> {
    Ok(Json(stocks::list(&state.db).await?))
}

pub async fn get_stock(
    State(state): State<Arc<AppState>>,
    ticker: Result<Path<String>, PathRejection>,
) -> Result<Json<Stock>, ApiError> {
    let Path(ticker) = ticker?;
    Ok(Json(stocks::get(&state.db, &ticker).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use crate::stocks;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_list_and_get() {
        let state = test_state(trading_hours()).await;
        stocks::upsert(&state.db, "SNTL", Some("Sonatel".to_string()), 25_000.0)
            .await
            .unwrap();

        let (status, json) = send(&state, "GET", "/api/stocks", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["ticker"], "SNTL");
        assert_eq!(json[0]["currentPrice"], 25_000.0);

        let (status, json) = send(&state, "GET", "/api/stocks/sntl", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["name"], "Sonatel");

        let (status, json) = send(&state, "GET", "/api/stocks/NOPE", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "STOCK_NOT_FOUND");
    }
}
