//! Grant lifecycle rules enforced by the role directory, exercised directly
//! against a migrated database.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use reviewhub::authz::RoleDirectory;
use reviewhub::errors::AppError;
use reviewhub::models::rbac::{RoleCreateRequest, RoleKind};

// Well-known seed ids.
const ROLE_REVIEW: i64 = 2;
const ROLE_PROJECT_MEMBER: i64 = 6;
const ROLE_PROJECT_REVIEWER: i64 = 7;

async fn setup() -> Result<(SqlitePool, TempDir)> {
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

    Ok((pool, dir))
}

async fn insert_user(pool: &SqlitePool, login: &str) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO users (login, display_name, password_hash, is_active, created_at, updated_at) VALUES (?, ?, 'x', 1, datetime('now'), datetime('now'))",
    )
    .bind(login)
    .bind(login)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

async fn insert_project(pool: &SqlitePool, key: &str, created_by: i64) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO projects (key, name, created_by, created_at, updated_at) VALUES (?, ?, ?, datetime('now'), datetime('now'))",
    )
    .bind(key)
    .bind(key)
    .bind(created_by)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

#[tokio::test]
async fn global_grant_lifecycle() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let user = insert_user(&pool, "u1").await?;

    let grant = directory.grant_global(user, ROLE_REVIEW).await?;
    assert!(grant.is_active);

    // granting an already-active role is a conflict
    let err = directory.grant_global(user, ROLE_REVIEW).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    let revoked = directory.revoke_global(user, ROLE_REVIEW).await?;
    assert!(!revoked.is_active);
    assert!(directory.global_roles_of(user).await?.is_empty());

    // revoking again finds no active grant
    let err = directory.revoke_global(user, ROLE_REVIEW).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

    // re-granting reactivates the same row instead of inserting a new one
    let regrant = directory.grant_global(user, ROLE_REVIEW).await?;
    assert_eq!(regrant.id, grant.id);
    assert!(regrant.is_active);

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM global_role_grants WHERE user_id = ? AND role_id = ?",
    )
    .bind(user)
    .bind(ROLE_REVIEW)
    .fetch_one(&pool)
    .await?;
    assert_eq!(rows, 1);

    Ok(())
}

#[tokio::test]
async fn global_grant_rejects_project_kind_roles() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let user = insert_user(&pool, "u1").await?;

    let err = directory
        .grant_global(user, ROLE_PROJECT_MEMBER)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn project_grant_lifecycle_and_last_role_protection() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let owner = insert_user(&pool, "owner").await?;
    let user = insert_user(&pool, "member").await?;
    let project = insert_project(&pool, "CORE", owner).await?;

    let grant = directory
        .grant_project(project, user, ROLE_PROJECT_MEMBER)
        .await?;
    assert!(grant.is_active);
    assert_eq!(directory.member_project_ids(user).await?, vec![project]);

    let err = directory
        .grant_project(project, user, ROLE_PROJECT_MEMBER)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // the only active role cannot be revoked individually
    let err = directory
        .revoke_project(project, user, ROLE_PROJECT_MEMBER)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // with a second role the first becomes revocable
    directory
        .grant_project(project, user, ROLE_PROJECT_REVIEWER)
        .await?;
    let revoked = directory
        .revoke_project(project, user, ROLE_PROJECT_MEMBER)
        .await?;
    assert!(!revoked.is_active);

    // and the remaining role is protected again
    let err = directory
        .revoke_project(project, user, ROLE_PROJECT_REVIEWER)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // full removal clears everything at once
    directory.remove_membership(project, user).await?;
    assert!(directory.member_project_ids(user).await?.is_empty());
    assert!(!directory.is_project_member(user, project).await?);

    let err = directory.remove_membership(project, user).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

    // joining again after removal reactivates the old row
    let rejoined = directory
        .grant_project(project, user, ROLE_PROJECT_REVIEWER)
        .await?;
    assert!(rejoined.is_active);
    assert!(directory.is_project_member(user, project).await?);

    Ok(())
}

#[tokio::test]
async fn concurrent_revokes_cannot_strip_the_last_role() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let owner = insert_user(&pool, "owner").await?;
    let user = insert_user(&pool, "member").await?;
    let project = insert_project(&pool, "CORE", owner).await?;

    directory
        .grant_project(project, user, ROLE_PROJECT_MEMBER)
        .await?;
    directory
        .grant_project(project, user, ROLE_PROJECT_REVIEWER)
        .await?;

    // two revokes racing over the member's two roles: whatever the
    // interleaving, at most one may land
    let (a, b) = tokio::join!(
        directory.revoke_project(project, user, ROLE_PROJECT_MEMBER),
        directory.revoke_project(project, user, ROLE_PROJECT_REVIEWER),
    );
    assert!(
        u8::from(a.is_ok()) + u8::from(b.is_ok()) <= 1,
        "got {a:?} / {b:?}"
    );

    let active: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM project_role_grants WHERE project_id = ? AND user_id = ? AND is_active = 1",
    )
    .bind(project)
    .bind(user)
    .fetch_one(&pool)
    .await?;
    assert!(active >= 1, "member left with no active role");

    Ok(())
}

#[tokio::test]
async fn racing_duplicate_grants_surface_as_conflict() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let user = insert_user(&pool, "u1").await?;

    let (a, b) = tokio::join!(
        directory.grant_global(user, ROLE_REVIEW),
        directory.grant_global(user, ROLE_REVIEW),
    );

    // one wins; the loser gets a Conflict, never a raw constraint error
    let mut results = [a, b];
    results.sort_by_key(|r| r.is_err());
    assert!(results[0].is_ok(), "got {:?}", results[0]);
    assert!(
        matches!(results[1], Err(AppError::Conflict(_))),
        "got {:?}",
        results[1]
    );

    let rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM global_role_grants WHERE user_id = ? AND role_id = ?",
    )
    .bind(user)
    .bind(ROLE_REVIEW)
    .fetch_one(&pool)
    .await?;
    assert_eq!(rows, 1);

    Ok(())
}

#[tokio::test]
async fn permission_replacement_is_transactional() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());

    let role = directory
        .create_role(&RoleCreateRequest {
            name: "triage".to_string(),
            kind: RoleKind::Global,
            description: None,
        })
        .await?;

    directory
        .assign_permissions_to_role(role.id, &[1, 2], None)
        .await?;
    assert_eq!(
        directory.effective_permissions(role.id, Utc::now()).await?,
        vec!["project:create".to_string(), "project:view_all".to_string()]
    );

    // a replacement is not an add
    directory
        .assign_permissions_to_role(role.id, &[4], None)
        .await?;
    assert_eq!(
        directory.effective_permissions(role.id, Utc::now()).await?,
        vec!["issue:view_all".to_string()]
    );

    // an unknown permission id rolls the whole replacement back
    let err = directory
        .assign_permissions_to_role(role.id, &[1, 999], None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
    assert_eq!(
        directory.effective_permissions(role.id, Utc::now()).await?,
        vec!["issue:view_all".to_string()]
    );

    // expired grants stop counting
    directory
        .assign_permissions_to_role(role.id, &[1], Some(Utc::now() - Duration::hours(1)))
        .await?;
    assert!(directory
        .effective_permissions(role.id, Utc::now())
        .await?
        .is_empty());

    Ok(())
}

#[tokio::test]
async fn role_deletion_requires_no_active_grants() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());
    let user = insert_user(&pool, "u1").await?;

    let role = directory
        .create_role(&RoleCreateRequest {
            name: "temp".to_string(),
            kind: RoleKind::Global,
            description: None,
        })
        .await?;
    directory.grant_global(user, role.id).await?;

    let err = directory.delete_role(role.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    directory.revoke_global(user, role.id).await?;
    directory.delete_role(role.id).await?;
    let err = directory.get_role(role.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");

    Ok(())
}

#[tokio::test]
async fn duplicate_role_names_collide_per_kind_only() -> Result<()> {
    let (pool, _dir) = setup().await?;
    let directory = RoleDirectory::new(pool.clone());

    // 'admin' exists in both kinds already; a third with either kind collides
    let err = directory
        .create_role(&RoleCreateRequest {
            name: "admin".to_string(),
            kind: RoleKind::Global,
            description: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got {err:?}");

    // same name under a new kind is fine
    let role = directory
        .create_role(&RoleCreateRequest {
            name: "triage".to_string(),
            kind: RoleKind::Project,
            description: None,
        })
        .await?;
    assert_eq!(role.kind, RoleKind::Project);

    Ok(())
}
