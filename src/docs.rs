//! OpenAPI document and Swagger UI wiring.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::refresh,
        routes::auth::me,
        routes::projects::list_projects,
        routes::projects::create_project,
        routes::projects::get_project,
        routes::projects::update_project,
        routes::projects::list_members,
        routes::projects::add_member,
        routes::projects::revoke_member_role,
        routes::projects::remove_member,
        routes::issues::list_issues,
        routes::issues::list_all_issues,
        routes::issues::create_issue,
        routes::issues::get_issue,
        routes::issues::update_issue,
        routes::rbac::list_roles,
        routes::rbac::create_role,
        routes::rbac::get_role,
        routes::rbac::delete_role,
        routes::rbac::get_role_permissions,
        routes::rbac::replace_role_permissions,
        routes::rbac::list_permissions,
        routes::rbac::list_permissions_by_module,
        routes::rbac::create_permission,
        routes::rbac::update_permission,
        routes::rbac::delete_permission,
        routes::rbac::get_user_roles,
        routes::rbac::grant_role_to_user,
        routes::rbac::revoke_role_from_user,
        routes::rbac::get_effective_permissions,
        routes::menus::my_menu_tree,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::user::RefreshRequest,
            models::project::Project,
            models::project::ProjectCreateRequest,
            models::project::ProjectUpdateRequest,
            models::project::ProjectMember,
            models::issue::Issue,
            models::issue::IssueCreateRequest,
            models::issue::IssueUpdateRequest,
            models::rbac::Role,
            models::rbac::RoleKind,
            models::rbac::RoleCreateRequest,
            models::rbac::Permission,
            models::rbac::PermissionCreateRequest,
            models::rbac::PermissionUpdateRequest,
            models::rbac::GlobalRoleGrant,
            models::rbac::ProjectRoleGrant,
            models::rbac::GrantRoleRequest,
            models::rbac::ReplacePermissionsRequest,
            models::rbac::AddMemberRequest,
            models::rbac::EffectivePermissionsResponse,
            models::rbac::EffectivePermissionEntry,
            models::menu::MenuNode,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness probe"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Projects", description = "Project and membership management"),
        (name = "Issues", description = "Issue tracking, scoped by visibility"),
        (name = "RBAC", description = "Role and permission administration"),
        (name = "Menus", description = "Capability tree for the UI"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Swagger UI at /docs with Try-it-out enabled and the bearer token persisted
/// across page reloads.
pub fn swagger_routes() -> SwaggerUi {
    let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
        .try_it_out_enabled(true)
        .with_credentials(true)
        .persist_authorization(true);

    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(swagger_config)
}
