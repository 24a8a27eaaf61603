use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`

use reviewhub::config::AuthConfig;
use reviewhub::create_app_with_config;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    let cfg = Arc::new(AuthConfig::new(
        b"test-access-secret".to_vec(),
        b"test-refresh-secret".to_vec(),
        3600,
        HashSet::new(),
    ));
    let app = create_app_with_config(pool.clone(), cfg);

    Ok((app, pool, dir))
}

async fn read_json(resp: Response) -> Result<serde_json::Value> {
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn registration_survives_a_missing_default_role() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    // strip the seeded default role entirely
    sqlx::query(
        "DELETE FROM role_menu_grants WHERE role_id = (SELECT id FROM roles WHERE name = 'user' AND kind = 'global')",
    )
    .execute(&pool)
    .await?;
    sqlx::query("DELETE FROM roles WHERE name = 'user' AND kind = 'global'")
        .execute(&pool)
        .await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "roleless", "display_name": "Roleless", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let auth = read_json(resp).await?;
    let user_id = auth["user"]["id"].as_i64().context("missing user id")?;

    let grants: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM global_role_grants WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(grants, 0);

    Ok(())
}

async fn post_json(app: &Router, uri: &str, payload: serde_json::Value) -> Result<Response> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?;
    Ok(app.clone().oneshot(req).await?)
}

#[tokio::test]
async fn register_login_refresh_flow() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "ada", "display_name": "Ada", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let auth = read_json(resp).await?;
    let access = auth["access_token"].as_str().context("missing access_token")?.to_string();
    let refresh = auth["refresh_token"].as_str().context("missing refresh_token")?.to_string();
    assert_ne!(access, refresh);
    assert_eq!(auth["user"]["login"], "ada");

    // wrong password
    let resp = post_json(
        &app,
        "/auth/login",
        json!({"login": "ada", "password": "nope-nope-nope"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // correct password
    let resp = post_json(
        &app,
        "/auth/login",
        json!({"login": "ada", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::OK);

    // rotation with the refresh token yields a fresh pair
    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": refresh})).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let rotated = read_json(resp).await?;
    assert!(rotated["access_token"].as_str().is_some());
    assert!(rotated["refresh_token"].as_str().is_some());

    // an access token is signed with the other key and must not refresh
    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": access})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // /auth/me with the access token
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("authorization", format!("Bearer {}", access))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let me = read_json(resp).await?;
    assert_eq!(me["login"], "ada");

    // no credentials
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // garbage token
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("authorization", "Bearer not-a-jwt")
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn duplicate_login_is_a_conflict() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "grace", "display_name": "Grace", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "grace", "display_name": "Other Grace", "password": "password456"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn short_password_is_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "eve", "display_name": "Eve", "password": "short"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn refresh_rejects_a_recreated_login() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    let resp = post_json(
        &app,
        "/auth/register",
        json!({"login": "alan", "display_name": "Alan", "password": "password123"}),
    )
    .await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let auth = read_json(resp).await?;
    let refresh = auth["refresh_token"].as_str().context("missing refresh_token")?.to_string();
    let user_id = auth["user"]["id"].as_i64().context("missing user id")?;

    // Delete the account and recreate the same login under a new row id; the
    // old refresh token carries the old id and must die with it.
    sqlx::query("DELETE FROM global_role_grants WHERE user_id = ?")
        .bind(user_id)
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&pool)
        .await?;
    sqlx::query(
        "INSERT INTO users (login, display_name, password_hash, is_active, created_at, updated_at) VALUES ('alan', 'Impostor', 'x', 1, datetime('now'), datetime('now'))",
    )
    .execute(&pool)
    .await?;

    let resp = post_json(&app, "/auth/refresh", json!({"refresh_token": refresh})).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
