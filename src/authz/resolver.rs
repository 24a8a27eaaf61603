//! The policy core.
//!
//! A pure decision layer over the role directory: aggregates a principal's
//! effective permissions, classifies their visibility tier and answers the
//! per-project action predicates. Stateless and re-evaluated per request; no
//! caching across requests, so a revoked role is dead on the very next check.
//!
//! The boolean predicates (`has_permission`, `project_action_allowed`) never
//! propagate errors: an unexpected lookup failure is logged and treated as
//! deny.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::authz::directory::RoleDirectory;
use crate::authz::permissions;
use crate::authz::scope::QueryScope;
use crate::config::AuthConfig;
use crate::errors::AppResult;
use crate::models::rbac::EffectivePermissionEntry;
use crate::utils::utc_now;

/// Coarse visibility classification, priority-ordered: Admin wins over
/// ProjectAdmin wins over Member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityTier {
    /// Unconditional visibility of all data.
    Admin,
    /// Restricted to the principal's projects. The `project_admin` flag is a
    /// global role, evaluated globally, not per project.
    ProjectAdmin { project_ids: Vec<i64> },
    /// Restricted to entities the principal created or is assigned to, within
    /// their projects.
    Member {
        principal_id: i64,
        project_ids: Vec<i64>,
    },
}

impl VisibilityTier {
    /// The query-scoping contract handed to data services.
    pub fn scope(&self) -> QueryScope {
        match self {
            VisibilityTier::Admin => QueryScope::AllData,
            VisibilityTier::ProjectAdmin { project_ids } => {
                QueryScope::ProjectSubset(project_ids.clone())
            }
            VisibilityTier::Member {
                principal_id,
                project_ids,
            } => QueryScope::OwnedOrAssigned {
                principal_id: *principal_id,
                project_ids: project_ids.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAction {
    View,
    Admin,
    Member,
    Update,
}

/// Decision seam for handlers that only need yes/no answers.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn has_permission(&self, principal_id: i64, code: &str) -> bool;

    async fn project_action_allowed(
        &self,
        principal_id: i64,
        project_id: i64,
        action: ProjectAction,
    ) -> bool;
}

#[derive(Clone)]
pub struct AuthzResolver {
    directory: RoleDirectory,
    cfg: Arc<AuthConfig>,
}

impl AuthzResolver {
    pub fn new(pool: SqlitePool, cfg: Arc<AuthConfig>) -> Self {
        Self {
            directory: RoleDirectory::new(pool),
            cfg,
        }
    }

    /// Union of permission codes over every active global role, deduplicated
    /// by code. The first role seen carrying a code is retained for
    /// diagnostics only.
    pub async fn effective_permissions(
        &self,
        principal_id: i64,
    ) -> AppResult<Vec<EffectivePermissionEntry>> {
        let now = utc_now();
        let mut seen: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();

        for role in self.directory.global_roles_of(principal_id).await? {
            for code in self.directory.effective_permissions(role.id, now).await? {
                if seen.insert(code.clone()) {
                    entries.push(EffectivePermissionEntry {
                        code,
                        via_role: role.name.clone(),
                    });
                }
            }
        }

        Ok(entries)
    }

    pub async fn permission_codes(&self, principal_id: i64) -> AppResult<HashSet<String>> {
        Ok(self
            .effective_permissions(principal_id)
            .await?
            .into_iter()
            .map(|entry| entry.code)
            .collect())
    }

    /// Classify the principal's visibility, optionally narrowed to one
    /// requested project. A requested project outside the permitted set
    /// yields an empty project set, not an authorization error: listings come
    /// back empty instead of leaking that the project exists.
    pub async fn visibility_tier(
        &self,
        principal_id: i64,
        project_id: Option<i64>,
    ) -> AppResult<VisibilityTier> {
        let global_roles = self.directory.global_roles_of(principal_id).await?;

        if global_roles
            .iter()
            .any(|role| self.cfg.is_admin_role(&role.name))
        {
            return Ok(VisibilityTier::Admin);
        }

        let member_ids = self.directory.member_project_ids(principal_id).await?;
        let project_ids = narrow(member_ids, project_id);

        if global_roles
            .iter()
            .any(|role| role.name == self.cfg.project_admin_role)
        {
            return Ok(VisibilityTier::ProjectAdmin { project_ids });
        }

        Ok(VisibilityTier::Member {
            principal_id,
            project_ids,
        })
    }

    async fn project_action_decision(
        &self,
        principal_id: i64,
        project_id: i64,
        action: ProjectAction,
    ) -> AppResult<bool> {
        match action {
            ProjectAction::View => {
                let codes = self.permission_codes(principal_id).await?;
                if codes.contains(permissions::PROJECT_VIEW_ALL) {
                    return Ok(true);
                }
                self.directory.is_project_member(principal_id, project_id).await
            }
            ProjectAction::Admin => {
                let global_roles = self.directory.global_roles_of(principal_id).await?;
                if global_roles
                    .iter()
                    .any(|role| self.cfg.is_admin_role(&role.name))
                {
                    return Ok(true);
                }
                let codes = self.permission_codes(principal_id).await?;
                if codes.contains(permissions::PROJECT_MANAGE_ALL) {
                    return Ok(true);
                }
                self.directory
                    .holds_project_role(principal_id, project_id, &self.cfg.project_local_admin_role)
                    .await
            }
            // Update deliberately uses the member rule.
            ProjectAction::Member | ProjectAction::Update => {
                self.directory.is_project_member(principal_id, project_id).await
            }
        }
    }
}

#[async_trait]
impl PolicyEngine for AuthzResolver {
    async fn has_permission(&self, principal_id: i64, code: &str) -> bool {
        match self.permission_codes(principal_id).await {
            Ok(codes) => {
                let allowed = codes.contains(code);
                tracing::debug!(
                    principal_id,
                    code,
                    allowed,
                    "permission check"
                );
                allowed
            }
            Err(err) => {
                tracing::warn!(
                    principal_id,
                    code,
                    error = %err,
                    "permission lookup failed, denying"
                );
                false
            }
        }
    }

    async fn project_action_allowed(
        &self,
        principal_id: i64,
        project_id: i64,
        action: ProjectAction,
    ) -> bool {
        match self
            .project_action_decision(principal_id, project_id, action)
            .await
        {
            Ok(allowed) => {
                tracing::debug!(
                    principal_id,
                    project_id,
                    ?action,
                    allowed,
                    "project action check"
                );
                allowed
            }
            Err(err) => {
                tracing::warn!(
                    principal_id,
                    project_id,
                    ?action,
                    error = %err,
                    "project action lookup failed, denying"
                );
                false
            }
        }
    }
}

fn narrow(permitted: Vec<i64>, requested: Option<i64>) -> Vec<i64> {
    match requested {
        Some(id) if permitted.contains(&id) => vec![id],
        Some(_) => Vec::new(),
        None => permitted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_keeps_only_the_requested_project() {
        assert_eq!(narrow(vec![1, 2, 3], Some(2)), vec![2]);
        assert_eq!(narrow(vec![1, 2, 3], None), vec![1, 2, 3]);
        // Outside the permitted set: quietly empty, never an error.
        assert_eq!(narrow(vec![1, 2, 3], Some(9)), Vec::<i64>::new());
        assert_eq!(narrow(vec![], Some(9)), Vec::<i64>::new());
    }

    #[test]
    fn tiers_map_to_their_scopes() {
        assert_eq!(VisibilityTier::Admin.scope(), QueryScope::AllData);
        assert_eq!(
            VisibilityTier::ProjectAdmin {
                project_ids: vec![4]
            }
            .scope(),
            QueryScope::ProjectSubset(vec![4])
        );
        assert_eq!(
            VisibilityTier::Member {
                principal_id: 9,
                project_ids: vec![4]
            }
            .scope(),
            QueryScope::OwnedOrAssigned {
                principal_id: 9,
                project_ids: vec![4]
            }
        );
    }
}
