//! The audit listener persists events fired by handlers, and each row links
//! to the previous one through the hash chain.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`

use reviewhub::authz::RoleDirectory;
use reviewhub::config::AuthConfig;
use reviewhub::create_app_with_config;

const ROLE_PROJECT_ADMIN: i64 = 3;

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

#[tokio::test]
async fn events_are_persisted_and_hash_chained() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    // register fires 'user.registered'
    let payload = json!({"login": "audited", "display_name": "Audited", "password": "password123"});
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let auth: serde_json::Value = serde_json::from_slice(&bytes)?;
    let token = auth["access_token"].as_str().context("missing access_token")?.to_string();
    let user_id = auth["user"]["id"].as_i64().context("missing user id")?;

    let directory = RoleDirectory::new(pool.clone());
    directory.grant_global(user_id, ROLE_PROJECT_ADMIN).await?;

    // project creation fires 'project.created'
    let req = Request::builder()
        .method("POST")
        .uri("/projects")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({"key": "AUD", "name": "Audited"}).to_string()))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    // the listener persists asynchronously; poll until both rows are there
    let mut rows = Vec::new();
    for _ in 0..25 {
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let found = sqlx::query(
            "SELECT event_name, actor_id, prev_hash, hash FROM activity_log ORDER BY occurred_at, rowid",
        )
        .fetch_all(&pool)
        .await?;
        if found.len() >= 2 {
            rows = found;
            break;
        }
    }
    assert!(rows.len() >= 2, "expected at least two audit rows");

    let names: Vec<String> = rows.iter().map(|r| r.get("event_name")).collect();
    assert!(names.contains(&"user.registered".to_string()), "got {names:?}");
    assert!(names.contains(&"project.created".to_string()), "got {names:?}");

    // chain shape: first row has no predecessor, each later row points at the
    // previous row's hash
    let first_prev: Option<String> = rows[0].get("prev_hash");
    assert!(first_prev.is_none());
    for pair in rows.windows(2) {
        let prev_hash: String = pair[0].get("hash");
        let linked: Option<String> = pair[1].get("prev_hash");
        assert_eq!(linked.as_deref(), Some(prev_hash.as_str()));
    }

    Ok(())
}
