//! Permission catalog: the registry of permission codes.
//!
//! Codes are the only unit authorization checks operate on; ids never cross
//! module boundaries.

use std::collections::BTreeMap;

use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Permission, PermissionCreateRequest, PermissionUpdateRequest};
use crate::utils::utc_now;

#[derive(Clone)]
pub struct PermissionCatalog {
    pool: SqlitePool,
}

impl PermissionCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn lookup(&self, code: &str) -> AppResult<Permission> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, code, name, module, created_at, updated_at FROM permissions WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("permission '{code}' not found")))
    }

    pub async fn get(&self, id: i64) -> AppResult<Permission> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, code, name, module, created_at, updated_at FROM permissions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("permission not found"))
    }

    pub async fn list(&self) -> AppResult<Vec<Permission>> {
        Ok(sqlx::query_as::<_, Permission>(
            "SELECT id, code, name, module, created_at, updated_at FROM permissions ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Catalog grouped by module, for capability display.
    pub async fn list_by_module(&self) -> AppResult<BTreeMap<String, Vec<Permission>>> {
        let mut grouped: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
        for permission in self.list().await? {
            grouped
                .entry(permission.module.clone())
                .or_default()
                .push(permission);
        }
        Ok(grouped)
    }

    pub async fn create(&self, req: &PermissionCreateRequest) -> AppResult<Permission> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM permissions WHERE code = ?")
            .bind(&req.code)
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Err(AppError::conflict(format!(
                "permission code '{}' already exists",
                req.code
            )));
        }

        let now = utc_now();
        let result = sqlx::query(
            "INSERT INTO permissions (code, name, module, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&req.code)
        .bind(&req.name)
        .bind(&req.module)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get(result.last_insert_rowid()).await
    }

    /// Code is immutable after creation; only display fields can change.
    pub async fn update(&self, id: i64, req: &PermissionUpdateRequest) -> AppResult<Permission> {
        let current = self.get(id).await?;
        let name = req.name.clone().unwrap_or(current.name);
        let module = req.module.clone().unwrap_or(current.module);

        sqlx::query("UPDATE permissions SET name = ?, module = ?, updated_at = ? WHERE id = ?")
            .bind(&name)
            .bind(&module)
            .bind(utc_now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> AppResult<Permission> {
        let permission = self.get(id).await?;

        let grant_refs: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM role_permission_grants WHERE permission_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if grant_refs > 0 {
            return Err(AppError::conflict(
                "permission is still assigned to one or more roles",
            ));
        }

        let menu_refs: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM menu_entries WHERE permission_code = ?")
                .bind(&permission.code)
                .fetch_one(&self.pool)
                .await?;
        if menu_refs > 0 {
            return Err(AppError::conflict(
                "permission is still referenced by menu entries",
            ));
        }

        sqlx::query("DELETE FROM permissions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(permission)
    }
}
