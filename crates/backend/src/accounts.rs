use chrono::{Duration, Utc};
use common::types::{Role, SubscriptionTier};
use rand::RngCore;
use rusqlite::OptionalExtension;
use serde::Serialize;

use crate::db::{db_now, db_time, is_unique_violation, Db, DbError};

const MIN_PASSWORD_LEN: usize = 8;

#[cfg(not(test))]
const HASH_COST: u32 = 10;
// bcrypt's floor; keeps the test suite fast.
#[cfg(test)]
const HASH_COST: u32 = 4;

/// The caller, as resolved from a session token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub subscription_tier: SubscriptionTier,
}

impl AuthUser {
    /// Admins get full access regardless of their stored subscription.
    pub fn effective_tier(&self) -> SubscriptionTier {
        if self.role.is_admin() {
            SubscriptionTier::Max
        } else {
            self.subscription_tier
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub expires_at: String,
    pub user: AuthUser,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least 8 characters")]
    WeakPassword,
    #[error("name is required")]
    MissingName,
    #[error("an account already exists for this email")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(err))
    }
}

fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let valid = !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace);
    valid.then_some(email)
}

fn random_hex<const N: usize>() -> String {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// bcrypt hash with an embedded salt. Runs on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, HASH_COST))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn insert_session(
    conn: &rusqlite::Connection,
    user: AuthUser,
    ttl: Duration,
) -> Result<Session, rusqlite::Error> {
    let now = Utc::now();
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        [db_time(now)],
    )?;
    let token = random_hex::<32>();
    let expires_at = db_time(now + ttl);
    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![token, user.id, db_time(now), expires_at],
    )?;
    Ok(Session {
        token,
        expires_at,
        user,
    })
}

pub async fn register(
    db: &Db,
    email: &str,
    password: &str,
    name: &str,
    ttl: Duration,
) -> Result<Session, AuthError> {
    let email = normalize_email(email).ok_or(AuthError::InvalidEmail)?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::WeakPassword);
    }
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(AuthError::MissingName);
    }

    let hash = hash_password(password).await?;

    db.call("accounts.register", move |conn| -> Result<_, AuthError> {
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO users (email, password_hash, name, role, subscription_tier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                email,
                hash,
                name,
                Role::User,
                SubscriptionTier::Free,
                db_now(),
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(AuthError::EmailTaken),
            Err(e) => return Err(e.into()),
        }
        let user = AuthUser {
            id: tx.last_insert_rowid(),
            email,
            name,
            role: Role::User,
            subscription_tier: SubscriptionTier::Free,
        };
        let session = insert_session(&tx, user, ttl)?;
        tx.commit()?;
        Ok(session)
    })
    .await
}

pub async fn login(
    db: &Db,
    email: &str,
    password: &str,
    ttl: Duration,
) -> Result<Session, AuthError> {
    let email = normalize_email(email).ok_or(AuthError::InvalidCredentials)?;

    let row = db
        .call("accounts.find_user", move |conn| -> Result<_, AuthError> {
            let row = conn
                .query_row(
                    "SELECT id, email, name, role, subscription_tier, password_hash
                     FROM users WHERE email = ?1",
                    [&email],
                    |row| {
                        Ok((
                            AuthUser {
                                id: row.get(0)?,
                                email: row.get(1)?,
                                name: row.get(2)?,
                                role: row.get(3)?,
                                subscription_tier: row.get(4)?,
                            },
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?;

    let Some((user, stored_hash)) = row else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &stored_hash).await? {
        return Err(AuthError::InvalidCredentials);
    }

    db.call("accounts.login", move |conn| -> Result<_, AuthError> {
        Ok(insert_session(conn, user, ttl)?)
    })
    .await
}

/// Look up the user behind a session token. Expired sessions resolve to `None`.
pub async fn resolve_session(db: &Db, token: &str) -> Result<Option<AuthUser>, DbError> {
    let token = token.to_string();
    let now = db_now();
    db.call("accounts.resolve_session", move |conn| -> Result<_, DbError> {
        let user = conn
            .query_row(
                "SELECT u.id, u.email, u.name, u.role, u.subscription_tier
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                [&token, &now],
                |row| {
                    Ok(AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(2)?,
                        role: row.get(3)?,
                        subscription_tier: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    })
    .await
}

pub async fn logout(db: &Db, token: &str) -> Result<(), DbError> {
    let token = token.to_string();
    db.call("accounts.logout", move |conn| -> Result<_, DbError> {
        conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
        Ok(())
    })
    .await
}

/// Admin action: change a user's subscription tier.
pub async fn set_subscription_tier(
    db: &Db,
    user_id: i64,
    tier: SubscriptionTier,
) -> Result<(), AuthError> {
    db.call("accounts.set_tier", move |conn| -> Result<_, AuthError> {
        let updated = conn.execute(
            "UPDATE users SET subscription_tier = ?1 WHERE id = ?2",
            rusqlite::params![tier, user_id],
        )?;
        if updated == 0 {
            return Err(AuthError::UserNotFound(user_id));
        }
        Ok(())
    })
    .await
}
