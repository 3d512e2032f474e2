use serde::Serialize;

use crate::db::{Db, DbError};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;
/// Rankings considered when locating a single user.
const RANK_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: i64,
    pub name: String,
    pub total_value: f64,
    pub gain_loss: f64,
    pub gain_loss_percent: f64,
    pub valid_transactions: i64,
    pub is_eligible: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRank {
    pub rank: Option<usize>,
    pub total_participants: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_participants: i64,
    pub active_participants: i64,
    pub eligible_participants: i64,
    pub banned_participants: i64,
    pub total_transactions: i64,
}

/// Rank every ACTIVE participant holding an ACTIVE CONCOURS wallet by gain
/// percentage, best first. Positions in stocks without a reference price
/// count as zero.
fn rankings(conn: &rusqlite::Connection, cap: usize) -> rusqlite::Result<Vec<LeaderboardEntry>> {
    let mut stmt = conn.prepare(
        "SELECT p.user_id, u.name, w.cash_balance, w.initial_balance,
                p.valid_transactions, p.is_eligible,
                COALESCE((
                    SELECT SUM(pos.quantity * s.current_price)
                    FROM positions pos JOIN stocks s ON s.ticker = pos.stock_ticker
                    WHERE pos.portfolio_id = w.id
                ), 0.0)
         FROM challenge_participants p
         JOIN users u ON u.id = p.user_id
         JOIN portfolios w ON w.user_id = p.user_id
              AND w.wallet_type = 'CONCOURS' AND w.status = 'ACTIVE'
         WHERE p.status = 'ACTIVE'",
    )?;

    let mut entries = stmt
        .query_map([], |row| {
            let cash: f64 = row.get(2)?;
            let initial: f64 = row.get(3)?;
            let invested: f64 = row.get(6)?;
            let total_value = cash + invested;
            let gain_loss = total_value - initial;
            Ok(LeaderboardEntry {
                rank: 0,
                user_id: row.get(0)?,
                name: row.get(1)?,
                total_value,
                gain_loss,
                gain_loss_percent: if initial > 0.0 {
                    gain_loss / initial * 100.0
                } else {
                    0.0
                },
                valid_transactions: row.get(4)?,
                is_eligible: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    entries.sort_by(|a, b| {
        b.gain_loss_percent
            .total_cmp(&a.gain_loss_percent)
            .then(a.user_id.cmp(&b.user_id))
    });
    entries.truncate(cap);
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    Ok(entries)
}

/// Top `limit` entries; `None` means the default, larger values are capped.
pub async fn leaderboard(db: &Db, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>, DbError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    db.call("leaderboard.top", move |conn| -> Result<_, DbError> {
        Ok(rankings(conn, limit)?)
    })
    .await
}

pub async fn user_rank(db: &Db, user_id: i64) -> Result<UserRank, DbError> {
    db.call("leaderboard.user_rank", move |conn| -> Result<_, DbError> {
        let ranked = rankings(conn, RANK_SCAN_LIMIT)?;
        let total = ranked.len();
        let rank = ranked.iter().find(|e| e.user_id == user_id).map(|e| e.rank);
        Ok(UserRank {
            rank,
            total_participants: total,
            percentile: rank.map(|r| (total - r) as f64 / total as f64 * 100.0),
        })
    })
    .await
}

pub async fn statistics(db: &Db) -> Result<Statistics, DbError> {
    db.call("leaderboard.statistics", |conn| -> Result<_, DbError> {
        let (total, active, eligible, banned) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'ACTIVE'), 0),
                    COALESCE(SUM(is_eligible), 0),
                    COALESCE(SUM(status = 'BANNED'), 0)
             FROM challenge_participants",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;
        let transactions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions t
             JOIN portfolios w ON w.id = t.portfolio_id
             WHERE w.wallet_type = 'CONCOURS'",
            [],
            |row| row.get(0),
        )?;
        Ok(Statistics {
            total_participants: total,
            active_participants: active,
            eligible_participants: eligible,
            banned_participants: banned,
            total_transactions: transactions,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::tests::{enrolled_user, insert_user};
    use crate::challenge::{set_standing, ModerationAction};
    use crate::portfolio::{execute_trade, TradeOrder};
    use crate::stocks;
    use common::types::{Side, WalletType};

    async fn buy(db: &Db, user: i64, ticker: &str, quantity: i64, price: f64) {
        execute_trade(
            db,
            user,
            WalletType::Concours,
            Side::Buy,
            TradeOrder {
                stock_ticker: ticker.to_string(),
                quantity,
                price_per_share: price,
            },
        )
        .await
        .unwrap();
    }

    /// Three participants: one up 10%, one flat, one down 5%.
    async fn seeded() -> (Db, i64, i64, i64) {
        let db = Db::open_memory().await.unwrap();
        stocks::upsert(&db, "SNTL", None, 2_000.0).await.unwrap();
        stocks::upsert(&db, "BOAB", None, 500.0).await.unwrap();

        let winner = enrolled_user(&db, "winner@mail.ci").await;
        let flat = enrolled_user(&db, "flat@mail.ci").await;
        let loser = enrolled_user(&db, "loser@mail.ci").await;

        // 100 SNTL bought at 1000, now 2000: +100_000 on 1_000_000.
        buy(&db, winner, "SNTL", 100, 1_000.0).await;
        // 100 BOAB bought at 1000, now 500: -50_000.
        buy(&db, loser, "BOAB", 100, 1_000.0).await;
        (db, winner, flat, loser)
    }

    #[tokio::test]
    async fn test_ranked_by_gain_percent() {
        let (db, winner, flat, loser) = seeded().await;
        let board = leaderboard(&db, None).await.unwrap();

        let order: Vec<i64> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![winner, flat, loser]);
        assert_eq!(board[0].rank, 1);
        assert!((board[0].gain_loss_percent - 10.0).abs() < 1e-9);
        assert_eq!(board[0].total_value, 1_100_000.0);
        assert!((board[2].gain_loss_percent + 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unpriced_positions_count_zero() {
        let db = Db::open_memory().await.unwrap();
        let user = enrolled_user(&db, "awa@mail.ci").await;
        buy(&db, user, "NOPRICE", 10, 1_000.0).await;

        let board = leaderboard(&db, None).await.unwrap();
        assert_eq!(board[0].total_value, 990_000.0);
        assert!((board[0].gain_loss_percent + 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_banned_participants_excluded() {
        let (db, winner, _flat, _loser) = seeded().await;
        set_standing(
            &db,
            winner,
            ModerationAction::Ban {
                reason: "fraude".to_string(),
            },
        )
        .await
        .unwrap();

        let board = leaderboard(&db, Some(500)).await.unwrap();
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|e| e.user_id != winner));
        assert_eq!(board[0].rank, 1);
    }

    #[tokio::test]
    async fn test_limit_applied() {
        let (db, winner, _, _) = seeded().await;
        let board = leaderboard(&db, Some(1)).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, winner);
    }

    #[tokio::test]
    async fn test_user_rank_and_percentile() {
        let (db, _winner, flat, _loser) = seeded().await;
        let rank = user_rank(&db, flat).await.unwrap();
        assert_eq!(rank.rank, Some(2));
        assert_eq!(rank.total_participants, 3);
        let percentile = rank.percentile.unwrap();
        assert!((percentile - 100.0 / 3.0).abs() < 1e-9);

        let outsider = insert_user(&db, "kofi@mail.ci").await;
        let none = user_rank(&db, outsider).await.unwrap();
        assert_eq!(none.rank, None);
        assert_eq!(none.total_participants, 3);
        assert!(none.percentile.is_none());
    }

    #[tokio::test]
    async fn test_statistics() {
        let (db, winner, flat, _) = seeded().await;
        set_standing(&db, winner, ModerationAction::Ban { reason: "x".to_string() })
            .await
            .unwrap();
        set_standing(&db, flat, ModerationAction::Suspend).await.unwrap();

        let stats = statistics(&db).await.unwrap();
        assert_eq!(stats.total_participants, 3);
        assert_eq!(stats.active_participants, 1);
        assert_eq!(stats.banned_participants, 1);
        assert_eq!(stats.eligible_participants, 0);
        assert_eq!(stats.total_transactions, 2);
    }
}
