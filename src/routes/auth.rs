//! Authentication endpoints: register, login, refresh, me.
//!
//! Tokens issued here carry a role-name snapshot for display; authority is
//! always re-derived from the role directory per request, never from claims.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;

use crate::app::AppState;
use crate::authz::roles;
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::user::{AuthResponse, DbUser, LoginRequest, RefreshRequest, RegisterRequest, User};
use crate::tokens::{AuthUser, TokenKind};
use crate::utils::{hash_password, utc_now, verify_password};

#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Login already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    ensure_login_available(&state.pool, &payload.login).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();

    let result = sqlx::query(
        "INSERT INTO users (login, display_name, password_hash, is_active, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
    )
    .bind(&payload.login)
    .bind(&payload.display_name)
    .bind(&password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;
    let user_id = result.last_insert_rowid();

    // Every account starts with the default global role so menus and basic
    // capabilities work out of the box. A missing seed role is tolerated;
    // any other failure aborts the registration.
    match default_role_id(&state.pool).await {
        Ok(default_role) => {
            state.directory().grant_global(user_id, default_role).await?;
        }
        Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }

    let db_user = fetch_user_by_id(&state.pool, user_id).await?;
    let response = issue_pair(&state, db_user).await?;

    log_activity(&state.event_bus, "registered", Some(user_id), &response.user);

    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let db_user = fetch_user_by_login(&state.pool, &payload.login)
        .await?
        .ok_or_else(|| AppError::unauthenticated("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthenticated("invalid credentials"));
    }

    let response = issue_pair(&state, db_user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair issued", body = AuthResponse),
        (status = 401, description = "Invalid or expired refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let claims = state.tokens.verify(&payload.refresh_token, TokenKind::Refresh)?;

    // Re-load the live principal; the internal id must still match, which
    // defends against login reuse after account deletion and recreation.
    let db_user = fetch_user_by_login(&state.pool, &claims.sub)
        .await?
        .ok_or_else(|| AppError::invalid_token("subject no longer exists"))?;
    if db_user.id != claims.user_id {
        return Err(AppError::invalid_token("subject identity changed"));
    }

    // Rotation issues a brand-new pair; the old refresh token is not
    // blacklisted and stays valid until its own expiry.
    let response = issue_pair(&state, db_user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearerAuth" = []))
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<User>> {
    let db_user = fetch_user_by_id(&state.pool, auth.user_id).await?;
    Ok(Json(db_user.into()))
}

async fn issue_pair(state: &AppState, db_user: DbUser) -> AppResult<AuthResponse> {
    let role_names: Vec<String> = state
        .directory()
        .global_roles_of(db_user.id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();

    let now = utc_now();
    let access_token = state
        .tokens
        .issue_access(db_user.id, &db_user.login, &role_names, now)?;
    let refresh_token = state
        .tokens
        .issue_refresh(db_user.id, &db_user.login, &role_names, now)?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: db_user.into(),
    })
}

async fn ensure_login_available(pool: &SqlitePool, login: &str) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE login = ?")
        .bind(login)
        .fetch_one(pool)
        .await?;

    if count > 0 {
        return Err(AppError::conflict("login already in use"));
    }

    Ok(())
}

async fn fetch_user_by_login(pool: &SqlitePool, login: &str) -> AppResult<Option<DbUser>> {
    Ok(sqlx::query_as::<_, DbUser>(
        "SELECT id, login, display_name, password_hash, is_active, created_at, updated_at FROM users WHERE login = ? AND is_active = 1",
    )
    .bind(login)
    .fetch_optional(pool)
    .await?)
}

async fn fetch_user_by_id(pool: &SqlitePool, user_id: i64) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>(
        "SELECT id, login, display_name, password_hash, is_active, created_at, updated_at FROM users WHERE id = ? AND is_active = 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("user not found"))
}

async fn default_role_id(pool: &SqlitePool) -> AppResult<i64> {
    sqlx::query_scalar("SELECT id FROM roles WHERE name = ? AND kind = 'global'")
        .bind(roles::USER)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("default role missing"))
}
