//! Role directory: role records, global and project-scoped role bindings and
//! their activation lifecycle, and role→permission grants.
//!
//! Lifecycle rules enforced here:
//! - granting over an inactive binding reactivates the existing row,
//! - granting over an active binding is a conflict,
//! - revocation soft-deletes (`is_active = 0`),
//! - a principal's last active project role cannot be revoked individually;
//!   full membership removal is the explicit operation for that,
//! - replacing a role's permission set is one transaction, so concurrent
//!   readers never observe a transiently empty set.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::errors::{AppError, AppResult};
use crate::models::project::ProjectMember;
use crate::models::rbac::{
    DbRole, GlobalRoleGrant, ProjectRoleGrant, Role, RoleCreateRequest, RoleKind,
};
use crate::utils::utc_now;

const ROLE_COLUMNS: &str = "id, name, kind, description, created_at, updated_at";

#[derive(Clone)]
pub struct RoleDirectory {
    pool: SqlitePool,
}

impl RoleDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // ROLES
    // =========================================================================

    pub async fn create_role(&self, req: &RoleCreateRequest) -> AppResult<Role> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM roles WHERE name = ? AND kind = ?")
            .bind(&req.name)
            .bind(req.kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        if count > 0 {
            return Err(AppError::conflict(format!(
                "{} role '{}' already exists",
                req.kind.as_str(),
                req.name
            )));
        }

        let now = utc_now();
        let result = sqlx::query(
            "INSERT INTO roles (name, kind, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&req.name)
        .bind(req.kind.as_str())
        .bind(&req.description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_role(result.last_insert_rowid()).await
    }

    pub async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY kind, name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Role::try_from).collect()
    }

    pub async fn get_role(&self, role_id: i64) -> AppResult<Role> {
        let row = sqlx::query_as::<_, DbRole>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"
        ))
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("role not found"))?;

        row.try_into()
    }

    pub async fn delete_role(&self, role_id: i64) -> AppResult<Role> {
        let role = self.get_role(role_id).await?;

        let active_grants: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(1) FROM global_role_grants WHERE role_id = ? AND is_active = 1)
                 + (SELECT COUNT(1) FROM project_role_grants WHERE role_id = ? AND is_active = 1)
            "#,
        )
        .bind(role_id)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await?;
        if active_grants > 0 {
            return Err(AppError::conflict("role still has active grants"));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permission_grants WHERE role_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM role_menu_grants WHERE role_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(role)
    }

    // =========================================================================
    // ROLE → PERMISSION GRANTS
    // =========================================================================

    /// Permission codes effective for a role at `now`: grants with no expiry
    /// or an expiry still in the future.
    pub async fn effective_permissions(
        &self,
        role_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let codes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.code
            FROM permissions p
            INNER JOIN role_permission_grants rpg ON rpg.permission_id = p.id
            WHERE rpg.role_id = ? AND (rpg.expires_at IS NULL OR rpg.expires_at > ?)
            ORDER BY p.code
            "#,
        )
        .bind(role_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    /// Replace the role's entire permission set. Callers pass the full desired
    /// set; this is clear-then-insert in one transaction, not an add.
    pub async fn assign_permissions_to_role(
        &self,
        role_id: i64,
        permission_ids: &[i64],
        expires_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.get_role(role_id).await?;
        let now = utc_now();

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM role_permission_grants WHERE role_id = ?")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        for permission_id in permission_ids {
            // INSERT..SELECT so an unknown permission id shows up as zero rows
            // and rolls the whole replacement back.
            let result = sqlx::query(
                r#"
                INSERT INTO role_permission_grants (role_id, permission_id, granted_at, expires_at)
                SELECT ?, id, ?, ? FROM permissions WHERE id = ?
                "#,
            )
            .bind(role_id)
            .bind(now)
            .bind(expires_at)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(AppError::not_found(format!(
                    "permission id {permission_id} not found"
                )));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // PRINCIPAL LOOKUPS
    // =========================================================================

    /// Roles from active global grants only.
    pub async fn global_roles_of(&self, user_id: i64) -> AppResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            r#"
            SELECT r.id, r.name, r.kind, r.description, r.created_at, r.updated_at
            FROM roles r
            INNER JOIN global_role_grants g ON g.role_id = r.id
            WHERE g.user_id = ? AND g.is_active = 1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Role::try_from).collect()
    }

    /// Roles from active project grants, scoped to one project.
    pub async fn project_roles_of(&self, user_id: i64, project_id: i64) -> AppResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            r#"
            SELECT r.id, r.name, r.kind, r.description, r.created_at, r.updated_at
            FROM roles r
            INNER JOIN project_role_grants g ON g.role_id = r.id
            WHERE g.user_id = ? AND g.project_id = ? AND g.is_active = 1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Role::try_from).collect()
    }

    /// Projects where the principal holds at least one active project role.
    pub async fn member_project_ids(&self, user_id: i64) -> AppResult<Vec<i64>> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT DISTINCT project_id FROM project_role_grants
            WHERE user_id = ? AND is_active = 1
            ORDER BY project_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn is_project_member(&self, user_id: i64, project_id: i64) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM project_role_grants WHERE user_id = ? AND project_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Whether the principal holds a named project-kind role in one project.
    pub async fn holds_project_role(
        &self,
        user_id: i64,
        project_id: i64,
        role_name: &str,
    ) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(1)
            FROM project_role_grants g
            INNER JOIN roles r ON r.id = g.role_id
            WHERE g.user_id = ? AND g.project_id = ? AND g.is_active = 1
              AND r.name = ? AND r.kind = 'project'
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(role_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    // =========================================================================
    // GRANT LIFECYCLE
    // =========================================================================

    pub async fn grant_global(&self, user_id: i64, role_id: i64) -> AppResult<GlobalRoleGrant> {
        let role = self.get_role(role_id).await?;
        if role.kind != RoleKind::Global {
            return Err(AppError::bad_request(format!(
                "role '{}' is not a global role",
                role.name
            )));
        }
        self.ensure_user_exists(user_id).await?;

        let existing = sqlx::query_as::<_, GlobalRoleGrant>(
            "SELECT id, user_id, role_id, is_active, granted_at FROM global_role_grants WHERE user_id = ? AND role_id = ?",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = utc_now();
        match existing {
            Some(grant) if grant.is_active => Err(AppError::conflict("role already granted")),
            Some(grant) => {
                sqlx::query("UPDATE global_role_grants SET is_active = 1, granted_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(grant.id)
                    .execute(&self.pool)
                    .await?;
                Ok(GlobalRoleGrant {
                    is_active: true,
                    granted_at: now,
                    ..grant
                })
            }
            None => {
                // A concurrent grant that slipped past the check above lands
                // on the UNIQUE(user_id, role_id) constraint.
                let result = sqlx::query(
                    "INSERT INTO global_role_grants (user_id, role_id, is_active, granted_at) VALUES (?, ?, 1, ?)",
                )
                .bind(user_id)
                .bind(role_id)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|err| conflict_on_unique(err, "role already granted"))?;
                Ok(GlobalRoleGrant {
                    id: result.last_insert_rowid(),
                    user_id,
                    role_id,
                    is_active: true,
                    granted_at: now,
                })
            }
        }
    }

    pub async fn revoke_global(&self, user_id: i64, role_id: i64) -> AppResult<GlobalRoleGrant> {
        let grant = sqlx::query_as::<_, GlobalRoleGrant>(
            "SELECT id, user_id, role_id, is_active, granted_at FROM global_role_grants WHERE user_id = ? AND role_id = ? AND is_active = 1",
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("no active grant for this role"))?;

        sqlx::query("UPDATE global_role_grants SET is_active = 0 WHERE id = ?")
            .bind(grant.id)
            .execute(&self.pool)
            .await?;

        Ok(GlobalRoleGrant {
            is_active: false,
            ..grant
        })
    }

    pub async fn grant_project(
        &self,
        project_id: i64,
        user_id: i64,
        role_id: i64,
    ) -> AppResult<ProjectRoleGrant> {
        let role = self.get_role(role_id).await?;
        if role.kind != RoleKind::Project {
            return Err(AppError::bad_request(format!(
                "role '{}' is not a project role",
                role.name
            )));
        }
        self.ensure_user_exists(user_id).await?;
        self.ensure_project_exists(project_id).await?;

        let existing = sqlx::query_as::<_, ProjectRoleGrant>(
            r#"
            SELECT id, project_id, user_id, role_id, is_active, joined_at, updated_at
            FROM project_role_grants
            WHERE project_id = ? AND user_id = ? AND role_id = ?
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = utc_now();
        match existing {
            Some(grant) if grant.is_active => {
                Err(AppError::conflict("role already granted in this project"))
            }
            Some(grant) => {
                sqlx::query("UPDATE project_role_grants SET is_active = 1, updated_at = ? WHERE id = ?")
                    .bind(now)
                    .bind(grant.id)
                    .execute(&self.pool)
                    .await?;
                Ok(ProjectRoleGrant {
                    is_active: true,
                    updated_at: now,
                    ..grant
                })
            }
            None => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO project_role_grants (project_id, user_id, role_id, is_active, joined_at, updated_at)
                    VALUES (?, ?, ?, 1, ?, ?)
                    "#,
                )
                .bind(project_id)
                .bind(user_id)
                .bind(role_id)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await
                .map_err(|err| conflict_on_unique(err, "role already granted in this project"))?;
                Ok(ProjectRoleGrant {
                    id: result.last_insert_rowid(),
                    project_id,
                    user_id,
                    role_id,
                    is_active: true,
                    joined_at: now,
                    updated_at: now,
                })
            }
        }
    }

    /// Revoke one project role. Refuses to strip the principal's last active
    /// role in the project; that would leave a member with zero roles, which
    /// is what `remove_membership` exists for.
    pub async fn revoke_project(
        &self,
        project_id: i64,
        user_id: i64,
        role_id: i64,
    ) -> AppResult<ProjectRoleGrant> {
        let mut tx = self.pool.begin().await?;

        let grant = sqlx::query_as::<_, ProjectRoleGrant>(
            r#"
            SELECT id, project_id, user_id, role_id, is_active, joined_at, updated_at
            FROM project_role_grants
            WHERE project_id = ? AND user_id = ? AND role_id = ? AND is_active = 1
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("no active grant for this role in this project"))?;

        let now = utc_now();
        // The last-role guard lives inside the UPDATE: the count is
        // re-evaluated at write time under the writer lock, so two revokes
        // racing over the same member cannot both pass it.
        let result = sqlx::query(
            r#"
            UPDATE project_role_grants SET is_active = 0, updated_at = ?
            WHERE id = ?
              AND (SELECT COUNT(1) FROM project_role_grants
                   WHERE project_id = ? AND user_id = ? AND is_active = 1) > 1
            "#,
        )
        .bind(now)
        .bind(grant.id)
        .bind(project_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::conflict(
                "cannot revoke the last project role; remove the member instead",
            ));
        }

        tx.commit().await?;

        Ok(ProjectRoleGrant {
            is_active: false,
            updated_at: now,
            ..grant
        })
    }

    /// Full membership removal: deactivates every role the principal holds in
    /// the project, in one transaction.
    pub async fn remove_membership(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        let now = utc_now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE project_role_grants SET is_active = 0, updated_at = ? WHERE project_id = ? AND user_id = ? AND is_active = 1",
        )
        .bind(now)
        .bind(project_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::not_found("user is not a member of this project"));
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn members_of(&self, project_id: i64) -> AppResult<Vec<ProjectMember>> {
        let rows: Vec<SqliteRow> = sqlx::query(
            r#"
            SELECT u.id AS user_id, u.login, u.display_name, r.name AS role_name
            FROM users u
            INNER JOIN project_role_grants g ON g.user_id = u.id
            INNER JOIN roles r ON r.id = g.role_id
            WHERE g.project_id = ? AND g.is_active = 1
            ORDER BY u.login, r.name
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut members: Vec<ProjectMember> = Vec::new();
        for row in rows {
            let user_id: i64 = row.get("user_id");
            let role_name: String = row.get("role_name");
            match members.last_mut() {
                Some(member) if member.user_id == user_id => member.roles.push(role_name),
                _ => members.push(ProjectMember {
                    user_id,
                    login: row.get("login"),
                    display_name: row.get("display_name"),
                    roles: vec![role_name],
                }),
            }
        }

        Ok(members)
    }

    async fn ensure_user_exists(&self, user_id: i64) -> AppResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Err(AppError::not_found("user not found"));
        }
        Ok(())
    }

    async fn ensure_project_exists(&self, project_id: i64) -> AppResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            return Err(AppError::not_found("project not found"));
        }
        Ok(())
    }
}

fn conflict_on_unique(err: sqlx::Error, message: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::conflict(message),
        _ => AppError::Database(err),
    }
}
