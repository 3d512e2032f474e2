use std::collections::HashMap;

use chrono::NaiveDate;
use common::types::{Side, Standing, WalletType};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::db::{db_now, is_unique_violation, Db, DbError};
use crate::stocks::normalize_ticker;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub wallet_type: WalletType,
    pub status: Standing,
    pub initial_balance: f64,
    pub cash_balance: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub stock_ticker: String,
    pub quantity: i64,
    pub average_buy_price: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioDetail {
    #[serde(flatten)]
    pub portfolio: Portfolio,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: i64,
    pub portfolio_id: i64,
    pub stock_ticker: String,
    #[serde(rename = "type")]
    pub side: Side,
    pub quantity: i64,
    pub price_per_share: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOrder {
    pub stock_ticker: String,
    pub quantity: i64,
    pub price_per_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    pub portfolio: PortfolioDetail,
    pub transaction: TransactionRecord,
}

/// Portfolio value at the end of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("invalid order: {0}")]
    InvalidOrder(&'static str),
    #[error("no {0} portfolio for this user")]
    NotFound(WalletType),
    #[error("a {0} portfolio already exists for this user")]
    AlreadyExists(WalletType),
    #[error("portfolio is {0} and cannot trade")]
    WalletLocked(Standing),
    #[error("insufficient funds: order costs {required}, cash is {available}")]
    InsufficientFunds { required: f64, available: f64 },
    #[error("no position in {0}")]
    PositionNotFound(String),
    #[error("insufficient shares: holding {held}, selling {requested}")]
    InsufficientShares { held: i64, requested: i64 },
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for PortfolioError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

/// Largest share count a single order may carry.
pub const MAX_ORDER_QUANTITY: i64 = 1_000_000_000;

const PORTFOLIO_COLUMNS: &str =
    "id, user_id, name, wallet_type, status, initial_balance, cash_balance, created_at";

fn portfolio_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Portfolio> {
    Ok(Portfolio {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        wallet_type: row.get(3)?,
        status: row.get(4)?,
        initial_balance: row.get(5)?,
        cash_balance: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn transaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        id: row.get(0)?,
        portfolio_id: row.get(1)?,
        stock_ticker: row.get(2)?,
        side: row.get(3)?,
        quantity: row.get(4)?,
        price_per_share: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub(crate) fn load_portfolio(
    conn: &rusqlite::Connection,
    user_id: i64,
    wallet: WalletType,
) -> rusqlite::Result<Option<Portfolio>> {
    conn.query_row(
        &format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = ?1 AND wallet_type = ?2"),
        rusqlite::params![user_id, wallet],
        portfolio_from_row,
    )
    .optional()
}

fn load_positions(
    conn: &rusqlite::Connection,
    portfolio_id: i64,
) -> rusqlite::Result<Vec<Position>> {
    let mut stmt = conn.prepare(
        "SELECT stock_ticker, quantity, average_buy_price
         FROM positions WHERE portfolio_id = ?1 ORDER BY stock_ticker",
    )?;
    let positions = stmt
        .query_map([portfolio_id], |row| {
            Ok(Position {
                stock_ticker: row.get(0)?,
                quantity: row.get(1)?,
                average_buy_price: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(positions)
}

fn with_positions(
    conn: &rusqlite::Connection,
    portfolio: Portfolio,
) -> rusqlite::Result<PortfolioDetail> {
    let positions = load_positions(conn, portfolio.id)?;
    Ok(PortfolioDetail {
        portfolio,
        positions,
    })
}

/// Insert a fresh wallet. Fails with a UNIQUE violation if the user
/// already has one of this type.
pub(crate) fn insert_portfolio(
    conn: &rusqlite::Connection,
    user_id: i64,
    name: &str,
    wallet: WalletType,
    initial_balance: f64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO portfolios (user_id, name, wallet_type, status, initial_balance, cash_balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6)",
        rusqlite::params![user_id, name, wallet, Standing::Active, initial_balance, db_now()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub async fn list_portfolios(db: &Db, user_id: i64) -> Result<Vec<PortfolioDetail>, DbError> {
    db.call("portfolio.list", move |conn| -> Result<_, DbError> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {PORTFOLIO_COLUMNS} FROM portfolios WHERE user_id = ?1 ORDER BY id"
        ))?;
        let portfolios = stmt
            .query_map([user_id], portfolio_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut details = Vec::with_capacity(portfolios.len());
        for portfolio in portfolios {
            details.push(with_positions(conn, portfolio)?);
        }
        Ok(details)
    })
    .await
}

pub async fn get_portfolio(
    db: &Db,
    user_id: i64,
    wallet: WalletType,
) -> Result<PortfolioDetail, PortfolioError> {
    db.call("portfolio.get", move |conn| -> Result<_, PortfolioError> {
        let portfolio =
            load_portfolio(conn, user_id, wallet)?.ok_or(PortfolioError::NotFound(wallet))?;
        Ok(with_positions(conn, portfolio)?)
    })
    .await
}

/// Create the caller's SANDBOX wallet. CONCOURS wallets come from enrollment.
pub async fn create_sandbox(
    db: &Db,
    user_id: i64,
    name: String,
    initial_balance: f64,
) -> Result<PortfolioDetail, PortfolioError> {
    if !initial_balance.is_finite() || initial_balance <= 0.0 {
        return Err(PortfolioError::InvalidOrder("initial balance must be > 0"));
    }

    db.call("portfolio.create", move |conn| -> Result<_, PortfolioError> {
        match insert_portfolio(conn, user_id, &name, WalletType::Sandbox, initial_balance) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(PortfolioError::AlreadyExists(WalletType::Sandbox))
            }
            Err(e) => return Err(e.into()),
        }
        let portfolio = load_portfolio(conn, user_id, WalletType::Sandbox)?
            .ok_or(PortfolioError::NotFound(WalletType::Sandbox))?;
        Ok(with_positions(conn, portfolio)?)
    })
    .await
}

fn validate_order(order: &TradeOrder) -> Result<String, PortfolioError> {
    let ticker = normalize_ticker(&order.stock_ticker)
        .ok_or(PortfolioError::InvalidOrder("stockTicker is missing or malformed"))?;
    if order.quantity <= 0 {
        return Err(PortfolioError::InvalidOrder("quantity must be a positive integer"));
    }
    if order.quantity > MAX_ORDER_QUANTITY {
        return Err(PortfolioError::InvalidOrder("quantity is too large"));
    }
    if !order.price_per_share.is_finite() || order.price_per_share <= 0.0 {
        return Err(PortfolioError::InvalidOrder("pricePerShare must be > 0"));
    }
    Ok(ticker)
}

/// Execute a buy or sell against the user's `wallet`.
///
/// Cash, position and transaction log change together in one SQLite
/// transaction; any failure leaves all three untouched.
pub async fn execute_trade(
    db: &Db,
    user_id: i64,
    wallet: WalletType,
    side: Side,
    order: TradeOrder,
) -> Result<TradeOutcome, PortfolioError> {
    let ticker = validate_order(&order)?;
    let quantity = order.quantity;
    let price = order.price_per_share;

    db.call("portfolio.trade", move |conn| -> Result<_, PortfolioError> {
        let tx = conn.transaction()?;

        let portfolio =
            load_portfolio(&tx, user_id, wallet)?.ok_or(PortfolioError::NotFound(wallet))?;
        if portfolio.status != Standing::Active {
            return Err(PortfolioError::WalletLocked(portfolio.status));
        }

        let amount = quantity as f64 * price;
        let held: Option<(i64, i64, f64)> = tx
            .query_row(
                "SELECT id, quantity, average_buy_price FROM positions
                 WHERE portfolio_id = ?1 AND stock_ticker = ?2",
                rusqlite::params![portfolio.id, ticker],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let now = db_now();

        match side {
            Side::Buy => {
                if amount > portfolio.cash_balance {
                    return Err(PortfolioError::InsufficientFunds {
                        required: amount,
                        available: portfolio.cash_balance,
                    });
                }
                match held {
                    Some((id, held_qty, avg)) => {
                        let new_qty = held_qty
                            .checked_add(quantity)
                            .ok_or(PortfolioError::InvalidOrder("position quantity too large"))?;
                        let new_avg = (held_qty as f64 * avg + amount) / new_qty as f64;
                        tx.execute(
                            "UPDATE positions SET quantity = ?1, average_buy_price = ?2, updated_at = ?3
                             WHERE id = ?4",
                            rusqlite::params![new_qty, new_avg, now, id],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO positions (portfolio_id, stock_ticker, quantity, average_buy_price, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)",
                            rusqlite::params![portfolio.id, ticker, quantity, price, now],
                        )?;
                    }
                }
                tx.execute(
                    "UPDATE portfolios SET cash_balance = cash_balance - ?1 WHERE id = ?2",
                    rusqlite::params![amount, portfolio.id],
                )?;
            }
            Side::Sell => {
                let Some((id, held_qty, _)) = held else {
                    return Err(PortfolioError::PositionNotFound(ticker));
                };
                if held_qty < quantity {
                    return Err(PortfolioError::InsufficientShares {
                        held: held_qty,
                        requested: quantity,
                    });
                }
                if held_qty == quantity {
                    tx.execute("DELETE FROM positions WHERE id = ?1", [id])?;
                } else {
                    tx.execute(
                        "UPDATE positions SET quantity = ?1, updated_at = ?2 WHERE id = ?3",
                        rusqlite::params![held_qty - quantity, now, id],
                    )?;
                }
                tx.execute(
                    "UPDATE portfolios SET cash_balance = cash_balance + ?1 WHERE id = ?2",
                    rusqlite::params![amount, portfolio.id],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO transactions (portfolio_id, stock_ticker, side, quantity, price_per_share, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![portfolio.id, ticker, side, quantity, price, now],
        )?;
        let transaction = TransactionRecord {
            id: tx.last_insert_rowid(),
            portfolio_id: portfolio.id,
            stock_ticker: ticker,
            side,
            quantity,
            price_per_share: price,
            created_at: now,
        };

        let portfolio = load_portfolio(&tx, user_id, wallet)?
            .ok_or(PortfolioError::NotFound(wallet))?;
        let detail = with_positions(&tx, portfolio)?;
        tx.commit()?;

        Ok(TradeOutcome {
            portfolio: detail,
            transaction,
        })
    })
    .await
}

fn load_transactions(
    conn: &rusqlite::Connection,
    portfolio_id: i64,
    newest_first: bool,
) -> rusqlite::Result<Vec<TransactionRecord>> {
    let order = if newest_first {
        "created_at DESC, id DESC"
    } else {
        "created_at ASC, id ASC"
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT id, portfolio_id, stock_ticker, side, quantity, price_per_share, created_at
         FROM transactions WHERE portfolio_id = ?1 ORDER BY {order}"
    ))?;
    let rows = stmt
        .query_map([portfolio_id], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub async fn transactions(
    db: &Db,
    user_id: i64,
    wallet: WalletType,
) -> Result<Vec<TransactionRecord>, PortfolioError> {
    db.call("portfolio.transactions", move |conn| -> Result<_, PortfolioError> {
        let portfolio =
            load_portfolio(conn, user_id, wallet)?.ok_or(PortfolioError::NotFound(wallet))?;
        Ok(load_transactions(conn, portfolio.id, true)?)
    })
    .await
}

/// Daily value series from the wallet's creation day through `today`.
///
/// Cash and holdings are replayed from the transaction log. Holdings are
/// valued at the stock's reference price, or at the last traded price when
/// the stock has none.
pub async fn history(
    db: &Db,
    user_id: i64,
    wallet: WalletType,
    today: NaiveDate,
) -> Result<Vec<HistoryPoint>, PortfolioError> {
    db.call("portfolio.history", move |conn| -> Result<_, PortfolioError> {
        let portfolio =
            load_portfolio(conn, user_id, wallet)?.ok_or(PortfolioError::NotFound(wallet))?;
        let log = load_transactions(conn, portfolio.id, false)?;

        let mut stmt = conn.prepare("SELECT ticker, current_price FROM stocks")?;
        let reference: HashMap<String, f64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;

        Ok(replay_history(&portfolio, &log, &reference, today))
    })
    .await
}

fn day_of(timestamp: &str) -> &str {
    timestamp.get(..10).unwrap_or(timestamp)
}

fn replay_history(
    portfolio: &Portfolio,
    log: &[TransactionRecord],
    reference: &HashMap<String, f64>,
    today: NaiveDate,
) -> Vec<HistoryPoint> {
    let start = NaiveDate::parse_from_str(day_of(&portfolio.created_at), "%Y-%m-%d")
        .unwrap_or(today)
        .min(today);

    let mut cash = portfolio.initial_balance;
    let mut holdings: HashMap<&str, i64> = HashMap::new();
    let mut last_price: HashMap<&str, f64> = HashMap::new();
    let mut pending = log.iter().peekable();
    let mut points = Vec::new();

    for day in start.iter_days().take_while(|d| *d <= today) {
        let date = day.format("%Y-%m-%d").to_string();
        while let Some(t) = pending.next_if(|t| day_of(&t.created_at) <= date.as_str()) {
            let amount = t.quantity as f64 * t.price_per_share;
            let qty = holdings.entry(t.stock_ticker.as_str()).or_insert(0);
            match t.side {
                Side::Buy => {
                    cash -= amount;
                    *qty = qty.saturating_add(t.quantity);
                }
                Side::Sell => {
                    cash += amount;
                    *qty = qty.saturating_sub(t.quantity);
                }
            }
            last_price.insert(t.stock_ticker.as_str(), t.price_per_share);
        }

        let invested: f64 = holdings
            .iter()
            .filter(|(_, qty)| **qty > 0)
            .map(|(ticker, qty)| {
                let price = reference
                    .get(*ticker)
                    .or_else(|| last_price.get(ticker))
                    .copied()
                    .unwrap_or(0.0);
                *qty as f64 * price
            })
            .sum();
        points.push(HistoryPoint {
            date,
            value: cash + invested,
        });
    }
    points
}
