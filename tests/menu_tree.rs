//! Capability tree over HTTP: entries come from active global role grants,
//! invisible entries are filtered, children nest under their parents.

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

use reviewhub::authz::RoleDirectory;
use reviewhub::config::AuthConfig;
use reviewhub::create_app_with_config;

const ROLE_ADMIN: i64 = 1;

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

async fn register(app: &Router, login: &str) -> Result<(String, i64)> {
    let payload = json!({"login": login, "display_name": login, "password": "password123"});
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let auth = read_json(resp).await?;
    let token = auth["access_token"].as_str().context("missing access_token")?.to_string();
    let user_id = auth["user"]["id"].as_i64().context("missing user id")?;
    Ok((token, user_id))
}

async fn fetch_menu(app: &Router, token: &str) -> Result<serde_json::Value> {
    let req = Request::builder()
        .method("GET")
        .uri("/menus")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    read_json(resp).await
}

fn titles(nodes: &serde_json::Value) -> Vec<String> {
    nodes
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|n| n["title"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn default_role_sees_the_basic_entries_only() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;
    let (token, _) = register(&app, "plain").await?;

    let tree = fetch_menu(&app, &token).await?;
    assert_eq!(titles(&tree), vec!["Dashboard", "Projects"]);
    assert!(tree[0]["children"].as_array().map(Vec::is_empty).unwrap_or(false));

    Ok(())
}

#[tokio::test]
async fn admin_grant_adds_the_nested_admin_section() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let (token, user) = register(&app, "boss").await?;

    directory.grant_global(user, ROLE_ADMIN).await?;

    let tree = fetch_menu(&app, &token).await?;
    assert_eq!(titles(&tree), vec!["Dashboard", "Projects", "Administration"]);

    // invisible entries ('Menus') are filtered before assembly
    let admin_section = &tree[2];
    assert_eq!(titles(&admin_section["children"]), vec!["Roles", "Permissions"]);

    // revocation changes the very next response
    directory.revoke_global(user, ROLE_ADMIN).await?;
    let tree = fetch_menu(&app, &token).await?;
    assert_eq!(titles(&tree), vec!["Dashboard", "Projects"]);

    Ok(())
}

#[tokio::test]
async fn menus_require_authentication() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let req = Request::builder().method("GET").uri("/menus").body(Body::empty())?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}
