pub mod leaderboard;
pub mod window;

use chrono::{DateTime, Utc};
use common::types::{Standing, WalletType};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use crate::config::ChallengeConfig;
use crate::db::{db_now, is_unique_violation, Db, DbError};
use crate::portfolio::{insert_portfolio, load_portfolio, Portfolio};
use window::TradingWindow;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Enrollment questionnaire. Every answer but the referral code is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentForm {
    pub experience_level: Option<String>,
    pub has_real_account: Option<bool>,
    pub discovery_source: Option<String>,
    pub primary_goal: Option<String>,
    pub preferred_sector: Option<String>,
    pub referral_code: Option<String>,
}

/// A participant's standing in the challenge, as seen by gates and handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeStatus {
    pub user_id: i64,
    pub status: Standing,
    pub enrollment_date: String,
    pub valid_transactions: i64,
    pub is_eligible: bool,
    pub accepted_rules: bool,
    pub rules_accepted_at: Option<String>,
    pub wallet_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub participant: ChallengeStatus,
    pub wallet: Portfolio,
}

/// Row of the admin participant listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub status: Standing,
    pub experience_level: String,
    pub has_real_account: bool,
    pub discovery_source: String,
    pub primary_goal: String,
    pub preferred_sector: String,
    pub referral_code: Option<String>,
    pub accepted_rules: bool,
    pub valid_transactions: i64,
    pub is_eligible: bool,
    pub enrollment_date: String,
    pub banned_at: Option<String>,
    pub ban_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantPage {
    pub data: Vec<ParticipantRecord>,
    pub total: i64,
    pub page: u32,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInfo {
    pub name: String,
    pub launch_date: DateTime<Utc>,
    pub initial_balance: f64,
    pub currency: &'static str,
    pub required_unique_tickers: u32,
    pub trading_days: Vec<String>,
    pub session_open: String,
    pub session_close: String,
    pub utc_offset_hours: i32,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum ModerationAction {
    Ban { reason: String },
    Suspend,
    Unban,
}

impl ModerationAction {
    fn target(&self) -> Standing {
        match self {
            Self::Ban { .. } => Standing::Banned,
            Self::Suspend => Standing::Suspended,
            Self::Unban => Standing::Active,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error("enrollment is incomplete: missing {}", .0.join(", "))]
    InvalidInput(Vec<&'static str>),
    #[error("already enrolled in the challenge")]
    AlreadyEnrolled,
    #[error("not enrolled in the challenge")]
    NotEnrolled,
    #[error("challenge rules already accepted")]
    RulesAlreadyAccepted,
    #[error("user {0} is not a challenge participant")]
    ParticipantNotFound(i64),
    #[error("participant is already banned")]
    AlreadyBanned,
    #[error("a ban reason is required")]
    MissingReason,
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for ChallengeError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

/// Public description of the challenge at `now`.
pub fn info(config: &ChallengeConfig, window: &TradingWindow, now: DateTime<Utc>) -> ChallengeInfo {
    let launch = window.launch();
    let (status, days_remaining) = if window.is_launched(now) {
        ("OPEN", None)
    } else {
        let remaining_ms = (launch - now).num_milliseconds();
        ("COMING_SOON", Some((remaining_ms + MS_PER_DAY - 1) / MS_PER_DAY))
    };
    ChallengeInfo {
        name: config.name.clone(),
        launch_date: launch,
        initial_balance: config.initial_balance,
        currency: "FCFA",
        required_unique_tickers: config.required_unique_tickers,
        trading_days: config.trading_days.clone(),
        session_open: config.session_open.clone(),
        session_close: config.session_close.clone(),
        utc_offset_hours: config.utc_offset_hours,
        status,
        days_remaining,
    }
}

fn required(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn load_status(
    conn: &rusqlite::Connection,
    user_id: i64,
) -> rusqlite::Result<Option<ChallengeStatus>> {
    conn.query_row(
        "SELECT p.user_id, p.status, p.enrollment_date, p.valid_transactions, p.is_eligible,
                p.accepted_rules, p.rules_accepted_at, w.id
         FROM challenge_participants p
         LEFT JOIN portfolios w ON w.user_id = p.user_id AND w.wallet_type = 'CONCOURS'
         WHERE p.user_id = ?1",
        [user_id],
        |row| {
            Ok(ChallengeStatus {
                user_id: row.get(0)?,
                status: row.get(1)?,
                enrollment_date: row.get(2)?,
                valid_transactions: row.get(3)?,
                is_eligible: row.get(4)?,
                accepted_rules: row.get(5)?,
                rules_accepted_at: row.get(6)?,
                wallet_id: row.get(7)?,
            })
        },
    )
    .optional()
}

/// Enrol `user_id`: creates the participant (rules not yet accepted) and
/// the CONCOURS wallet in one transaction.
pub async fn enroll(
    db: &Db,
    user_id: i64,
    form: EnrollmentForm,
    wallet_name: String,
    initial_balance: f64,
) -> Result<Enrollment, ChallengeError> {
    let experience_level = required(&form.experience_level);
    let discovery_source = required(&form.discovery_source);
    let primary_goal = required(&form.primary_goal);
    let preferred_sector = required(&form.preferred_sector);

    let mut missing = Vec::new();
    if experience_level.is_none() {
        missing.push("experienceLevel");
    }
    if form.has_real_account.is_none() {
        missing.push("hasRealAccount");
    }
    if discovery_source.is_none() {
        missing.push("discoverySource");
    }
    if primary_goal.is_none() {
        missing.push("primaryGoal");
    }
    if preferred_sector.is_none() {
        missing.push("preferredSector");
    }
    let (
        Some(experience_level),
        Some(has_real_account),
        Some(discovery_source),
        Some(primary_goal),
        Some(preferred_sector),
    ) = (
        experience_level,
        form.has_real_account,
        discovery_source,
        primary_goal,
        preferred_sector,
    )
    else {
        return Err(ChallengeError::InvalidInput(missing));
    };
    let referral_code = required(&form.referral_code);

    db.call("challenge.enroll", move |conn| -> Result<_, ChallengeError> {
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO challenge_participants
                (user_id, status, experience_level, has_real_account, discovery_source,
                 primary_goal, preferred_sector, referral_code, enrollment_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                user_id,
                Standing::Active,
                experience_level,
                has_real_account,
                discovery_source,
                primary_goal,
                preferred_sector,
                referral_code,
                db_now(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(ChallengeError::AlreadyEnrolled),
            Err(e) => return Err(e.into()),
        }

        match insert_portfolio(&tx, user_id, &wallet_name, WalletType::Concours, initial_balance) {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(ChallengeError::AlreadyEnrolled),
            Err(e) => return Err(e.into()),
        }

        let wallet = load_portfolio(&tx, user_id, WalletType::Concours)?
            .ok_or(ChallengeError::NotEnrolled)?;
        let participant = load_status(&tx, user_id)?.ok_or(ChallengeError::NotEnrolled)?;
        tx.commit()?;
        Ok(Enrollment {
            participant,
            wallet,
        })
    })
    .await
}

pub async fn accept_rules(db: &Db, user_id: i64) -> Result<ChallengeStatus, ChallengeError> {
    db.call("challenge.accept_rules", move |conn| -> Result<_, ChallengeError> {
        let current = load_status(conn, user_id)?.ok_or(ChallengeError::NotEnrolled)?;
        if current.accepted_rules {
            return Err(ChallengeError::RulesAlreadyAccepted);
        }
        conn.execute(
            "UPDATE challenge_participants SET accepted_rules = 1, rules_accepted_at = ?1
             WHERE user_id = ?2",
            rusqlite::params![db_now(), user_id],
        )?;
        load_status(conn, user_id)?.ok_or(ChallengeError::NotEnrolled)
    })
    .await
}

pub async fn status(db: &Db, user_id: i64) -> Result<Option<ChallengeStatus>, DbError> {
    db.call("challenge.status", move |conn| -> Result<_, DbError> {
        Ok(load_status(conn, user_id)?)
    })
    .await
}

/// Recount the distinct tickers traded in the user's CONCOURS wallet and
/// update eligibility. Returns `None` for non-participants.
pub async fn refresh_eligibility(
    db: &Db,
    user_id: i64,
    required_unique_tickers: u32,
) -> Result<Option<ChallengeStatus>, DbError> {
    db.call("challenge.refresh_eligibility", move |conn| -> Result<_, DbError> {
        let unique: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT t.stock_ticker)
             FROM transactions t
             JOIN portfolios w ON w.id = t.portfolio_id
             WHERE w.user_id = ?1 AND w.wallet_type = 'CONCOURS'",
            [user_id],
            |row| row.get(0),
        )?;
        let eligible = unique >= i64::from(required_unique_tickers);
        conn.execute(
            "UPDATE challenge_participants SET valid_transactions = ?1, is_eligible = ?2
             WHERE user_id = ?3",
            rusqlite::params![unique, eligible, user_id],
        )?;
        Ok(load_status(conn, user_id)?)
    })
    .await
}

/// Apply an admin moderation action. The CONCOURS wallet's status follows
/// the participant's in the same transaction.
pub async fn set_standing(
    db: &Db,
    user_id: i64,
    action: ModerationAction,
) -> Result<ChallengeStatus, ChallengeError> {
    if let ModerationAction::Ban { reason } = &action {
        if reason.trim().is_empty() {
            return Err(ChallengeError::MissingReason);
        }
    }
    let target = action.target();

    db.call("challenge.set_standing", move |conn| -> Result<_, ChallengeError> {
        let tx = conn.transaction()?;
        let current =
            load_status(&tx, user_id)?.ok_or(ChallengeError::ParticipantNotFound(user_id))?;

        match &action {
            ModerationAction::Ban { reason } => {
                if current.status == Standing::Banned {
                    return Err(ChallengeError::AlreadyBanned);
                }
                tx.execute(
                    "UPDATE challenge_participants SET status = ?1, banned_at = ?2, ban_reason = ?3
                     WHERE user_id = ?4",
                    rusqlite::params![target, db_now(), reason.trim(), user_id],
                )?;
            }
            ModerationAction::Suspend => {
                tx.execute(
                    "UPDATE challenge_participants SET status = ?1 WHERE user_id = ?2",
                    rusqlite::params![target, user_id],
                )?;
            }
            ModerationAction::Unban => {
                tx.execute(
                    "UPDATE challenge_participants SET status = ?1, banned_at = NULL, ban_reason = NULL
                     WHERE user_id = ?2",
                    rusqlite::params![target, user_id],
                )?;
            }
        }
        tx.execute(
            "UPDATE portfolios SET status = ?1 WHERE user_id = ?2 AND wallet_type = 'CONCOURS'",
            rusqlite::params![target, user_id],
        )?;

        let updated =
            load_status(&tx, user_id)?.ok_or(ChallengeError::ParticipantNotFound(user_id))?;
        tx.commit()?;
        Ok(updated)
    })
    .await
}

/// One page of participants, most recently enrolled first.
pub async fn participants(db: &Db, page: u32, limit: u32) -> Result<ParticipantPage, DbError> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let offset = i64::from(page - 1) * i64::from(limit);

    db.call("challenge.participants", move |conn| -> Result<_, DbError> {
        let total: i64 =
            conn.query_row("SELECT COUNT(*) FROM challenge_participants", [], |row| row.get(0))?;
        let mut stmt = conn.prepare(
            "SELECT p.user_id, u.name, u.email, p.status, p.experience_level, p.has_real_account,
                    p.discovery_source, p.primary_goal, p.preferred_sector, p.referral_code,
                    p.accepted_rules, p.valid_transactions, p.is_eligible, p.enrollment_date,
                    p.banned_at, p.ban_reason
             FROM challenge_participants p JOIN users u ON u.id = p.user_id
             ORDER BY p.enrollment_date DESC, p.id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let data = stmt
            .query_map(rusqlite::params![limit, offset], |row| {
                Ok(ParticipantRecord {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    status: row.get(3)?,
                    experience_level: row.get(4)?,
                    has_real_account: row.get(5)?,
                    discovery_source: row.get(6)?,
                    primary_goal: row.get(7)?,
                    preferred_sector: row.get(8)?,
                    referral_code: row.get(9)?,
                    accepted_rules: row.get(10)?,
                    valid_transactions: row.get(11)?,
                    is_eligible: row.get(12)?,
                    enrollment_date: row.get(13)?,
                    banned_at: row.get(14)?,
                    ban_reason: row.get(15)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let limit = i64::from(limit);
        Ok(ParticipantPage {
            data,
            total,
            page,
            total_pages: (total + limit - 1) / limit,
        })
    })
    .await
}
