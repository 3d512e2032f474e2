use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use tracing::error;

use crate::accounts::AuthError;
use crate::challenge::ChallengeError;
use crate::db::DbError;
use crate::portfolio::PortfolioError;
use crate::stocks::StockError;
use crate::watchlist::WatchlistError;

/// Error returned by every handler and middleware.
///
/// Renders as `{"error": <message>, "code": <CODE>, ...details}`.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// Attach an extra top-level field to the response body.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "authentication required",
        )
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal server error",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = self.details;
        body.insert("error".to_string(), Value::String(self.message));
        body.insert("code".to_string(), Value::String(self.code.to_string()));
        (self.status, Json(Value::Object(body))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        error!(error = %err, "database failure");
        Self::internal()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("INVALID_BODY", rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request("INVALID_PATH", rejection.body_text())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidEmail | AuthError::WeakPassword | AuthError::MissingName => {
                Self::bad_request("INVALID_INPUT", message)
            }
            AuthError::EmailTaken => Self::conflict("EMAIL_TAKEN", message),
            AuthError::InvalidCredentials => {
                Self::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", message)
            }
            AuthError::UserNotFound(_) => Self::not_found("USER_NOT_FOUND", message),
            AuthError::Hashing(e) => {
                error!(error = %e, "password hashing failure");
                Self::internal()
            }
            AuthError::Db(e) => e.into(),
        }
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        let message = err.to_string();
        match err {
            StockError::InvalidTicker(_) => Self::bad_request("INVALID_TICKER", message),
            StockError::InvalidPrice => Self::bad_request("INVALID_INPUT", message),
            StockError::NotFound(_) => Self::not_found("STOCK_NOT_FOUND", message),
            StockError::Db(e) => e.into(),
        }
    }
}

impl From<PortfolioError> for ApiError {
    fn from(err: PortfolioError) -> Self {
        let message = err.to_string();
        match err {
            PortfolioError::InvalidOrder(_) => Self::bad_request("INVALID_ORDER", message),
            PortfolioError::NotFound(wallet) => {
                Self::not_found("PORTFOLIO_NOT_FOUND", message).with("walletType", wallet.as_str())
            }
            PortfolioError::AlreadyExists(wallet) => {
                Self::conflict("PORTFOLIO_EXISTS", message).with("walletType", wallet.as_str())
            }
            PortfolioError::WalletLocked(status) => {
                Self::forbidden("WALLET_LOCKED", message).with("status", status.as_str())
            }
            PortfolioError::InsufficientFunds {
                required,
                available,
            } => Self::bad_request("INSUFFICIENT_FUNDS", message)
                .with("required", required)
                .with("available", available),
            PortfolioError::PositionNotFound(_) => Self::not_found("POSITION_NOT_FOUND", message),
            PortfolioError::InsufficientShares { held, requested } => {
                Self::bad_request("INSUFFICIENT_SHARES", message)
                    .with("held", held)
                    .with("requested", requested)
            }
            PortfolioError::Db(e) => e.into(),
        }
    }
}

impl From<WatchlistError> for ApiError {
    fn from(err: WatchlistError) -> Self {
        let message = err.to_string();
        match err {
            WatchlistError::InvalidTicker => Self::bad_request("INVALID_TICKER", message),
            WatchlistError::LimitReached { limit, tier } => {
                Self::forbidden("WATCHLIST_LIMIT_REACHED", message)
                    .with("limit", limit)
                    .with("tier", tier.as_str())
            }
            WatchlistError::NotFound(_) => Self::not_found("WATCHLIST_ITEM_NOT_FOUND", message),
            WatchlistError::Db(e) => e.into(),
        }
    }
}

impl From<ChallengeError> for ApiError {
    fn from(err: ChallengeError) -> Self {
        let message = err.to_string();
        match err {
            ChallengeError::InvalidInput(missing) => {
                Self::bad_request("INVALID_INPUT", message).with("required", missing)
            }
            ChallengeError::AlreadyEnrolled => Self::conflict("ALREADY_ENROLLED", message),
            ChallengeError::NotEnrolled => Self::forbidden("NOT_ENROLLED", message),
            ChallengeError::RulesAlreadyAccepted => {
                Self::conflict("RULES_ALREADY_ACCEPTED", message)
            }
            ChallengeError::ParticipantNotFound(_) => {
                Self::not_found("PARTICIPANT_NOT_FOUND", message)
            }
            ChallengeError::AlreadyBanned => Self::conflict("ALREADY_BANNED", message),
            ChallengeError::MissingReason => Self::bad_request("INVALID_INPUT", message),
            ChallengeError::Db(e) => e.into(),
        }
    }
}
