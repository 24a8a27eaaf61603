//! RBAC domain types: roles, permissions and the grant rows that bind them.
//!
//! Grant rows are never hard-deleted; revocation flips `is_active` so the
//! assignment history stays auditable, and re-granting reactivates the same
//! row instead of inserting a duplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    /// Scope is the whole system, independent of any project.
    Global,
    /// Scope is limited to one project per grant.
    Project,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::Global => "global",
            RoleKind::Project => "project",
        }
    }
}

impl std::str::FromStr for RoleKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(RoleKind::Global),
            "project" => Ok(RoleKind::Project),
            other => Err(AppError::internal(format!("unknown role kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub kind: RoleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Role {
    fn entity_type() -> &'static str {
        "role"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: db.id,
            name: db.name,
            kind: db.kind.parse()?,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "triage")]
    pub name: String,
    pub kind: RoleKind,
    #[schema(example = "May triage incoming issues")]
    pub description: Option<String>,
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Permission {
    pub id: i64,
    /// Globally unique dotted code; the only unit checks operate on.
    #[schema(example = "project:view_all")]
    pub code: String,
    pub name: String,
    /// Module grouping for capability display.
    #[schema(example = "project")]
    pub module: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Permission {
    fn entity_type() -> &'static str {
        "permission"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCreateRequest {
    #[schema(example = "issue:close")]
    pub code: String,
    #[schema(example = "Close issues")]
    pub name: String,
    #[schema(example = "issue")]
    pub module: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionUpdateRequest {
    pub name: Option<String>,
    pub module: Option<String>,
}

// =============================================================================
// GRANTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct GlobalRoleGrant {
    pub id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub is_active: bool,
    pub granted_at: DateTime<Utc>,
}

impl Loggable for GlobalRoleGrant {
    fn entity_type() -> &'static str {
        "global_role_grant"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.user_id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ProjectRoleGrant {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub role_id: i64,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for ProjectRoleGrant {
    fn entity_type() -> &'static str {
        "project_role_grant"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.user_id)
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRoleRequest {
    pub role_id: i64,
}

/// Full desired permission set for a role; the assignment replaces whatever
/// was there before, it is not an incremental add.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReplacePermissionsRequest {
    pub permission_ids: Vec<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberRequest {
    pub user_id: i64,
    pub role_id: i64,
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct EffectivePermissionsResponse {
    pub user_id: i64,
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermissionEntry>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EffectivePermissionEntry {
    #[schema(example = "project:view_all")]
    pub code: String,
    /// First role seen carrying the code; diagnostics only.
    #[schema(example = "admin")]
    pub via_role: String,
}
