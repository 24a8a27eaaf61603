//! Authorization core: permission catalog, role directory, the policy
//! resolver and the query-scoping contract it hands to data services.
//!
//! Tokens only establish identity (see `tokens`); everything here re-derives
//! authority from the role store on every check, so revocations are effective
//! immediately.

mod catalog;
mod directory;
mod menu;
mod resolver;
mod scope;

pub use catalog::PermissionCatalog;
pub use directory::RoleDirectory;
pub use menu::menu_tree;
pub use resolver::{AuthzResolver, PolicyEngine, ProjectAction, VisibilityTier};
pub use scope::{QueryScope, ScopeColumns};

use crate::errors::{AppError, AppResult};
use crate::tokens::AuthUser;

/// Well-known role names. Which global names carry Admin-tier visibility is
/// decided by `AuthConfig`, not by these constants.
pub mod roles {
    pub const ADMIN: &str = "admin";
    pub const REVIEW: &str = "review";
    pub const PROJECT_ADMIN: &str = "project_admin";
    pub const USER: &str = "user";
    /// Project-kind roles.
    pub const PROJECT_LOCAL_ADMIN: &str = "admin";
    pub const PROJECT_MEMBER: &str = "member";
}

/// Well-known permission codes.
pub mod permissions {
    pub const PROJECT_CREATE: &str = "project:create";
    pub const PROJECT_VIEW_ALL: &str = "project:view_all";
    pub const PROJECT_MANAGE_ALL: &str = "project:manage_all";
    pub const ISSUE_VIEW_ALL: &str = "issue:view_all";
    pub const RBAC_MANAGE: &str = "rbac:manage";
    pub const MENU_MANAGE: &str = "menu:manage";
}

/// Route guard: 403 with a generic message when the caller lacks `code`.
/// The missing code is not echoed back, so callers cannot enumerate the
/// catalog by probing.
pub async fn require_permission(
    resolver: &AuthzResolver,
    auth: &AuthUser,
    code: &str,
) -> AppResult<()> {
    if resolver.has_permission(auth.user_id, code).await {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
