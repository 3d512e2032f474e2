use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::db::{db_now, Db, DbError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub ticker: String,
    pub name: Option<String>,
    pub current_price: f64,
    pub updated_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("invalid ticker: {0:?}")]
    InvalidTicker(String),
    #[error("price must be a finite number >= 0")]
    InvalidPrice,
    #[error("stock {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for StockError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

/// Trim and upper-case a ticker. BRVM symbols are short alphanumerics,
/// some with a dotted suffix.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let ticker = raw.trim().to_uppercase();
    let valid = (1..=12).contains(&ticker.len())
        && ticker.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
    valid.then_some(ticker)
}

fn stock_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stock> {
    Ok(Stock {
        ticker: row.get(0)?,
        name: row.get(1)?,
        current_price: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

pub async fn list(db: &Db) -> Result<Vec<Stock>, DbError> {
    db.call("stocks.list", |conn| -> Result<_, DbError> {
        let mut stmt = conn.prepare(
            "SELECT ticker, name, current_price, updated_at FROM stocks ORDER BY ticker",
        )?;
        let stocks = stmt
            .query_map([], stock_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stocks)
    })
    .await
}

pub async fn get(db: &Db, ticker: &str) -> Result<Stock, StockError> {
    let ticker =
        normalize_ticker(ticker).ok_or_else(|| StockError::InvalidTicker(ticker.to_string()))?;
    db.call("stocks.get", move |conn| -> Result<_, StockError> {
        conn.query_row(
            "SELECT ticker, name, current_price, updated_at FROM stocks WHERE ticker = ?1",
            [&ticker],
            stock_from_row,
        )
        .optional()?
        .ok_or(StockError::NotFound(ticker))
    })
    .await
}

/// Insert or update a reference price. A `None` name keeps the stored one.
pub async fn upsert(
    db: &Db,
    ticker: &str,
    name: Option<String>,
    current_price: f64,
) -> Result<Stock, StockError> {
    let ticker =
        normalize_ticker(ticker).ok_or_else(|| StockError::InvalidTicker(ticker.to_string()))?;
    if !current_price.is_finite() || current_price < 0.0 {
        return Err(StockError::InvalidPrice);
    }

    db.call("stocks.upsert", move |conn| -> Result<_, StockError> {
        conn.execute(
            "INSERT INTO stocks (ticker, name, current_price, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ticker) DO UPDATE SET
                name = COALESCE(excluded.name, stocks.name),
                current_price = excluded.current_price,
                updated_at = excluded.updated_at",
            rusqlite::params![ticker, name, current_price, db_now()],
        )?;
        Ok(conn.query_row(
            "SELECT ticker, name, current_price, updated_at FROM stocks WHERE ticker = ?1",
            [&ticker],
            stock_from_row,
        )?)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ticker() {
        assert_eq!(normalize_ticker(" sntl "), Some("SNTL".to_string()));
        assert_eq!(normalize_ticker("orac.ci"), Some("ORAC.CI".to_string()));
        assert_eq!(normalize_ticker("   "), None);
        assert_eq!(normalize_ticker("SN TL"), None);
        assert_eq!(normalize_ticker("ABCDEFGHIJKLM"), None);
    }

    #[tokio::test]
    async fn test_upsert_then_get_and_list() {
        let db = Db::open_memory().await.unwrap();
        upsert(&db, "sntl", Some("Sonatel".to_string()), 25_000.0)
            .await
            .unwrap();
        upsert(&db, "BOAB", None, 6_100.0).await.unwrap();

        let sntl = get(&db, "SnTl").await.unwrap();
        assert_eq!(sntl.name.as_deref(), Some("Sonatel"));
        assert_eq!(sntl.current_price, 25_000.0);

        let tickers: Vec<String> = list(&db).await.unwrap().into_iter().map(|s| s.ticker).collect();
        assert_eq!(tickers, vec!["BOAB", "SNTL"]);
    }

    #[tokio::test]
    async fn test_upsert_keeps_name_when_omitted() {
        let db = Db::open_memory().await.unwrap();
        upsert(&db, "SNTL", Some("Sonatel".to_string()), 25_000.0)
            .await
            .unwrap();
        let updated = upsert(&db, "SNTL", None, 26_000.0).await.unwrap();
        assert_eq!(updated.name.as_deref(), Some("Sonatel"));
        assert_eq!(updated.current_price, 26_000.0);
    }

    #[tokio::test]
    async fn test_get_unknown_and_invalid() {
        let db = Db::open_memory().await.unwrap();
        assert!(matches!(get(&db, "NOPE").await, Err(StockError::NotFound(t)) if t == "NOPE"));
        assert!(matches!(
            upsert(&db, "SNTL", None, -1.0).await,
            Err(StockError::InvalidPrice)
        ));
        assert!(matches!(
            upsert(&db, "", None, 1.0).await,
            Err(StockError::InvalidTicker(_))
        ));
    }
}
