use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::accounts::{self, AuthUser, Session};
use crate::api::middleware::{SessionToken, SESSION_COOKIE};
use crate::api::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let max_age = state.config.auth.session_ttl_hours * 3600;
    let secure = if state.config.auth.cookie_secure {
        "; Secure"
    } else {
        ""
    };
    format!("{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}{secure}")
}

fn session_ttl(state: &AppState) -> chrono::Duration {
    chrono::Duration::hours(state.config.auth.session_ttl_hours)
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session: Session = accounts::register(
        &state.db,
        &req.email,
        &req.password,
        &req.name,
        session_ttl(&state),
    )
    .await?;
    info!(user_id = session.user.id, "user registered");

    let cookie = session_cookie(&state, &session.token);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(session),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let session = accounts::login(&state.db, &req.email, &req.password, session_ttl(&state)).await?;
    info!(user_id = session.user.id, "user logged in");

    let cookie = session_cookie(&state, &session.token);
    Ok(([(header::SET_COOKIE, cookie)], Json(session)))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, ApiError> {
    accounts::logout(&state.db, &token).await?;
    let cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]))
}

pub async fn me(Extension(user): Extension<AuthUser>) -> Json<AuthUser> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::test_support::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_register_login_me_logout() {
        let state = test_state(trading_hours()).await;

        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "Awa@Mail.ci", "password": "motdepasse", "name": "Awa"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["user"]["email"], "awa@mail.ci");
        assert_eq!(json["user"]["subscriptionTier"], "free");

        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "awa@mail.ci", "password": "motdepasse"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = json["token"].as_str().unwrap().to_string();

        let (status, me) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Awa");

        let (status, _) = send(&state, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&state, "GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_sets_http_only_cookie_usable_for_auth() {
        let state = test_state(trading_hours()).await;
        signup(&state, "awa@mail.ci").await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"email": "awa@mail.ci", "password": "motdepasse"}).to_string(),
            ))
            .unwrap();
        let response = router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=86400"));
        let pair = cookie.split(';').next().unwrap().to_string();

        let req = Request::builder()
            .uri("/api/auth/me")
            .header(header::COOKIE, pair)
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_errors() {
        let state = test_state(trading_hours()).await;
        signup(&state, "awa@mail.ci").await;

        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "awa@mail.ci", "password": "motdepasse", "name": "Awa"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "EMAIL_TAKEN");

        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "kofi@mail.ci", "password": "court", "name": "Kofi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_INPUT");

        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "kofi@mail.ci"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let state = test_state(trading_hours()).await;
        signup(&state, "awa@mail.ci").await;
        let (status, json) = send(
            &state,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "awa@mail.ci", "password": "mauvais"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "INVALID_CREDENTIALS");
    }
}
