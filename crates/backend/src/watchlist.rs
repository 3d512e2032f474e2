use common::types::SubscriptionTier;
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::db::{db_now, Db, DbError};
use crate::stocks::normalize_ticker;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub id: i64,
    pub stock_ticker: String,
    pub created_at: String,
}

/// Result of an add: a new row, or the one already there.
#[derive(Debug)]
pub enum AddOutcome {
    Created(WatchlistItem),
    Existing(WatchlistItem),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchlistError {
    #[error("stockTicker is missing or malformed")]
    InvalidTicker,
    #[error("watchlist limit of {limit} reached for the {tier} plan")]
    LimitReached { limit: u32, tier: SubscriptionTier },
    #[error("{0} is not in the watchlist")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for WatchlistError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WatchlistItem> {
    Ok(WatchlistItem {
        id: row.get(0)?,
        stock_ticker: row.get(1)?,
        created_at: row.get(2)?,
    })
}

pub async fn list(db: &Db, user_id: i64) -> Result<Vec<WatchlistItem>, DbError> {
    db.call("watchlist.list", move |conn| -> Result<_, DbError> {
        let mut stmt = conn.prepare(
            "SELECT id, stock_ticker, created_at FROM watchlist_items
             WHERE user_id = ?1 ORDER BY stock_ticker",
        )?;
        let items = stmt
            .query_map([user_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    })
    .await
}

/// Add `ticker` to the user's watchlist, capped by `tier`.
///
/// Re-adding a ticker already present returns it unchanged, even when the
/// list is full. The count, check and insert share one SQLite transaction.
pub async fn add(
    db: &Db,
    user_id: i64,
    tier: SubscriptionTier,
    ticker: &str,
) -> Result<AddOutcome, WatchlistError> {
    let ticker = normalize_ticker(ticker).ok_or(WatchlistError::InvalidTicker)?;

    db.call("watchlist.add", move |conn| -> Result<_, WatchlistError> {
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                "SELECT id, stock_ticker, created_at FROM watchlist_items
                 WHERE user_id = ?1 AND stock_ticker = ?2",
                rusqlite::params![user_id, ticker],
                item_from_row,
            )
            .optional()?;
        if let Some(item) = existing {
            return Ok(AddOutcome::Existing(item));
        }

        if let Some(limit) = tier.watchlist_limit() {
            let count: u32 = tx.query_row(
                "SELECT COUNT(*) FROM watchlist_items WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            if count >= limit {
                return Err(WatchlistError::LimitReached { limit, tier });
            }
        }

        let created_at = db_now();
        tx.execute(
            "INSERT INTO watchlist_items (user_id, stock_ticker, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, ticker, created_at],
        )?;
        let item = WatchlistItem {
            id: tx.last_insert_rowid(),
            stock_ticker: ticker,
            created_at,
        };
        tx.commit()?;
        Ok(AddOutcome::Created(item))
    })
    .await
}

pub async fn remove(db: &Db, user_id: i64, ticker: &str) -> Result<(), WatchlistError> {
    let ticker = normalize_ticker(ticker).ok_or(WatchlistError::InvalidTicker)?;

    db.call("watchlist.remove", move |conn| -> Result<_, WatchlistError> {
        let removed = conn.execute(
            "DELETE FROM watchlist_items WHERE user_id = ?1 AND stock_ticker = ?2",
            rusqlite::params![user_id, ticker],
        )?;
        if removed == 0 {
            return Err(WatchlistError::NotFound(ticker));
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_user(db: &Db) -> i64 {
        db.call("test.user", |conn| -> Result<_, DbError> {
            conn.execute(
                "INSERT INTO users (email, password_hash, name, created_at)
                 VALUES ('awa@mail.ci', 'h', 'Awa', '2026-01-01T00:00:00.000Z')",
                [],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_free_tier_capped_at_three() {
        let db = Db::open_memory().await.unwrap();
        let user = test_user(&db).await;

        for ticker in ["SNTL", "BOAB", "ORAC"] {
            let outcome = add(&db, user, SubscriptionTier::Free, ticker).await.unwrap();
            assert!(matches!(outcome, AddOutcome::Created(_)));
        }
        let err = add(&db, user, SubscriptionTier::Free, "SGBC").await.unwrap_err();
        assert!(matches!(
            err,
            WatchlistError::LimitReached {
                limit: 3,
                tier: SubscriptionTier::Free
            }
        ));
        assert_eq!(list(&db, user).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_is_idempotent_even_when_full() {
        let db = Db::open_memory().await.unwrap();
        let user = test_user(&db).await;
        for ticker in ["SNTL", "BOAB", "ORAC"] {
            add(&db, user, SubscriptionTier::Free, ticker).await.unwrap();
        }

        let outcome = add(&db, user, SubscriptionTier::Free, " sntl ").await.unwrap();
        match outcome {
            AddOutcome::Existing(item) => assert_eq!(item.stock_ticker, "SNTL"),
            other => panic!("expected Existing, got {other:?}"),
        }
        assert_eq!(list(&db, user).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unbounded_tiers() {
        let db = Db::open_memory().await.unwrap();
        let user = test_user(&db).await;
        for i in 0..20 {
            add(&db, user, SubscriptionTier::Pro, &format!("T{i}"))
                .await
                .unwrap();
        }
        assert_eq!(list(&db, user).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_list_sorted_and_remove() {
        let db = Db::open_memory().await.unwrap();
        let user = test_user(&db).await;
        for ticker in ["SNTL", "BOAB"] {
            add(&db, user, SubscriptionTier::Free, ticker).await.unwrap();
        }
        let tickers: Vec<String> = list(&db, user)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.stock_ticker)
            .collect();
        assert_eq!(tickers, vec!["BOAB", "SNTL"]);

        remove(&db, user, "boab").await.unwrap();
        assert!(matches!(
            remove(&db, user, "BOAB").await,
            Err(WatchlistError::NotFound(t)) if t == "BOAB"
        ));
        assert_eq!(list(&db, user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_ticker_rejected() {
        let db = Db::open_memory().await.unwrap();
        let user = test_user(&db).await;
        assert!(matches!(
            add(&db, user, SubscriptionTier::Free, "   ").await,
            Err(WatchlistError::InvalidTicker)
        ));
    }
}
