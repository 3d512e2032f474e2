use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use common::types::{Standing, WalletType};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::accounts::{self, AuthUser};
use crate::api::AppState;
use crate::challenge::{self, window::GateDecision, ChallengeStatus};
use crate::error::ApiError;
use crate::metrics::record_gate_rejection;

pub const SESSION_COOKIE: &str = "token";

/// Session token of the authenticated request.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// Wallet type a trade targets, decided by the trading-window gate.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedWallet(pub WalletType);

/// `walletType` / `wallet_type` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WalletQuery {
    #[serde(rename = "walletType")]
    wallet_type_camel: Option<String>,
    wallet_type: Option<String>,
}

impl WalletQuery {
    /// The requested wallet, `SANDBOX` when absent.
    pub fn resolve(&self) -> Result<WalletType, ApiError> {
        match self.wallet_type_camel.as_deref().or(self.wallet_type.as_deref()) {
            None => Ok(WalletType::Sandbox),
            Some(raw) => parse_wallet(raw),
        }
    }
}

fn parse_wallet(raw: &str) -> Result<WalletType, ApiError> {
    WalletType::from_str_loose(raw).ok_or_else(|| {
        ApiError::bad_request(
            "INVALID_WALLET_TYPE",
            format!("walletType must be SANDBOX or CONCOURS, got {raw:?}"),
        )
    })
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                cookie
                    .trim()
                    .strip_prefix(SESSION_COOKIE)
                    .and_then(|rest| rest.strip_prefix('='))
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            })
        })
}

/// Resolve the session from the bearer header or the `token` cookie.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_headers(req.headers()).ok_or_else(ApiError::unauthorized)?;
    let user = accounts::resolve_session(&state.db, &token)
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    req.extensions_mut().insert(user);
    req.extensions_mut().insert(SessionToken(token));
    Ok(next.run(req).await)
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let is_admin = req
        .extensions()
        .get::<AuthUser>()
        .is_some_and(|user| user.role.is_admin());
    if !is_admin {
        return Err(ApiError::forbidden(
            "ADMIN_REQUIRED",
            "administrator role required",
        ));
    }
    Ok(next.run(req).await)
}

fn authenticated(req: &Request) -> Result<AuthUser, ApiError> {
    req.extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(ApiError::unauthorized)
}

/// Wallet type named by the JSON body, else the query string, else SANDBOX.
fn requested_wallet(body: &[u8], query: &WalletQuery) -> Result<WalletType, ApiError> {
    let from_body = serde_json::from_slice::<Value>(body).ok().and_then(|json| {
        ["walletType", "wallet_type"]
            .iter()
            .find_map(|key| json.get(*key).filter(|v| !v.is_null()).cloned())
    });

    match from_body {
        Some(Value::String(raw)) => parse_wallet(&raw),
        Some(other) => Err(ApiError::bad_request(
            "INVALID_WALLET_TYPE",
            format!("walletType must be a string, got {other}"),
        )),
        None => query.resolve(),
    }
}

fn reject(err: ApiError) -> ApiError {
    debug!(code = err.code(), status = %err.status(), "gate rejected request");
    record_gate_rejection(err.code());
    err
}

/// Refuse CONCOURS trades before launch or outside the trading window.
///
/// The body is buffered to read the wallet type and handed on unchanged;
/// the decision is attached as [`ResolvedWallet`] so handlers act on the
/// same wallet the gate checked.
pub async fn trading_window_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, state.config.server.body_limit_bytes)
        .await
        .map_err(|e| {
            debug!(error = %e, "failed to buffer trade body");
            ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                "BODY_TOO_LARGE",
                "request body too large",
            )
        })?;
    let query = Query::<WalletQuery>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();
    let wallet = requested_wallet(&bytes, &query)?;

    let now = state.clock.now();
    match state.window.check(wallet, now) {
        GateDecision::Allowed => {}
        GateDecision::NotOpen {
            launch,
            days_remaining,
        } => {
            debug!(%now, days_remaining, "CONCOURS trade before launch");
            return Err(reject(
                ApiError::forbidden(
                    "CHALLENGE_NOT_OPEN",
                    format!("the challenge opens in {days_remaining} day(s)"),
                )
                .with("launchDate", launch.to_rfc3339())
                .with("daysRemaining", days_remaining),
            ));
        }
        GateDecision::OutsideWindow(violation) => {
            debug!(%now, ?violation, "CONCOURS trade outside trading window");
            return Err(reject(
                ApiError::forbidden("TRADING_NOT_ALLOWED", violation.message())
                    .with("walletType", WalletType::Concours.as_str()),
            ));
        }
    }

    let mut req = Request::from_parts(parts, Body::from(bytes));
    req.extensions_mut().insert(ResolvedWallet(wallet));
    Ok(next.run(req).await)
}

/// Full challenge gate: enrolled, rules accepted, not banned or suspended.
fn check_participant(status: Option<ChallengeStatus>) -> Result<ChallengeStatus, ApiError> {
    let status = status.ok_or_else(|| {
        ApiError::forbidden("NOT_ENROLLED", "enroll in the challenge first")
    })?;
    if !status.accepted_rules {
        return Err(ApiError::forbidden(
            "RULES_NOT_ACCEPTED",
            "accept the challenge rules first",
        ));
    }
    match status.status {
        Standing::Active => Ok(status),
        Standing::Banned => Err(ApiError::forbidden(
            "PARTICIPANT_BANNED",
            "you have been banned from the challenge",
        )),
        Standing::Suspended => Err(ApiError::forbidden(
            "PARTICIPANT_SUSPENDED",
            "your challenge participation is suspended",
        )),
    }
}

/// Applies [`check_participant`] to CONCOURS trades; SANDBOX passes through.
pub async fn concours_enrollment_gate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let wallet = req
        .extensions()
        .get::<ResolvedWallet>()
        .map_or(WalletType::Sandbox, |w| w.0);
    if wallet != WalletType::Concours {
        return Ok(next.run(req).await);
    }

    let user = authenticated(&req)?;
    let status = challenge::status(&state.db, user.id).await?;
    let status = check_participant(status).map_err(|err| {
        warn!(user_id = user.id, code = err.code(), "challenge gate refused trade");
        reject(err)
    })?;

    req.extensions_mut().insert(status);
    Ok(next.run(req).await)
}

/// Enrollment only, for endpoints a not-yet-ruled participant may use.
pub async fn require_enrollment(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticated(&req)?;
    let status = challenge::status(&state.db, user.id).await?.ok_or_else(|| {
        reject(ApiError::forbidden(
            "NOT_ENROLLED",
            "enroll in the challenge first",
        ))
    })?;

    req.extensions_mut().insert(status);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn status(accepted: bool, standing: Standing) -> ChallengeStatus {
        ChallengeStatus {
            user_id: 1,
            status: standing,
            enrollment_date: "2026-01-20T00:00:00.000Z".to_string(),
            valid_transactions: 0,
            is_eligible: false,
            accepted_rules: accepted,
            rules_accepted_at: None,
            wallet_id: Some(1),
        }
    }

    #[test]
    fn test_token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=abc123"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz"));

        let mut other = HeaderMap::new();
        other.insert(header::COOKIE, HeaderValue::from_static("tokenx=nope; token="));
        assert_eq!(token_from_headers(&other), None);
    }

    #[test]
    fn test_body_wallet_wins_over_query() {
        let query = WalletQuery {
            wallet_type_camel: Some("SANDBOX".to_string()),
            wallet_type: None,
        };
        let wallet = requested_wallet(br#"{"wallet_type":"concours"}"#, &query).unwrap();
        assert_eq!(wallet, WalletType::Concours);

        let wallet = requested_wallet(b"", &query).unwrap();
        assert_eq!(wallet, WalletType::Sandbox);

        let wallet = requested_wallet(b"{}", &WalletQuery::default()).unwrap();
        assert_eq!(wallet, WalletType::Sandbox);
    }

    #[test]
    fn test_unknown_wallet_rejected() {
        let err = requested_wallet(br#"{"walletType":"LIVE"}"#, &WalletQuery::default()).unwrap_err();
        assert_eq!(err.code(), "INVALID_WALLET_TYPE");
        let err = requested_wallet(br#"{"walletType":7}"#, &WalletQuery::default()).unwrap_err();
        assert_eq!(err.code(), "INVALID_WALLET_TYPE");
    }

    #[test]
    fn test_participant_checks_in_order() {
        assert_eq!(check_participant(None).unwrap_err().code(), "NOT_ENROLLED");
        assert_eq!(
            check_participant(Some(status(false, Standing::Banned)))
                .unwrap_err()
                .code(),
            "RULES_NOT_ACCEPTED"
        );
        assert_eq!(
            check_participant(Some(status(true, Standing::Banned)))
                .unwrap_err()
                .code(),
            "PARTICIPANT_BANNED"
        );
        assert_eq!(
            check_participant(Some(status(true, Standing::Suspended)))
                .unwrap_err()
                .code(),
            "PARTICIPANT_SUSPENDED"
        );
        assert!(check_participant(Some(status(true, Standing::Active))).is_ok());
    }
}
