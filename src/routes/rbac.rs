//! RBAC admin API: roles, permissions, global grants and effective-permission
//! inspection.
//!
//! Everything here requires `rbac:manage`, so responses may carry more detail
//! than the generic deny message used elsewhere; this surface is trusted
//! admin tooling. All mutations land in the audit log with Critical severity.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::app::AppState;
use crate::authz::{permissions, require_permission};
use crate::errors::AppResult;
use crate::events::log_activity;
use crate::models::rbac::{
    EffectivePermissionsResponse, GrantRoleRequest, Permission, PermissionCreateRequest,
    PermissionUpdateRequest, ReplacePermissionsRequest, Role, RoleCreateRequest,
};
use crate::tokens::AuthUser;
use crate::utils::utc_now;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Roles
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).delete(delete_role))
        .route(
            "/roles/:role_id/permissions",
            get(get_role_permissions).put(replace_role_permissions),
        )
        // Permissions
        .route("/permissions", get(list_permissions).post(create_permission))
        .route(
            "/permissions/:permission_id",
            axum::routing::put(update_permission).delete(delete_permission),
        )
        .route("/permissions/by-module", get(list_permissions_by_module))
        // Global role grants
        .route("/users/:user_id/roles", get(get_user_roles).post(grant_role_to_user))
        .route("/users/:user_id/roles/:role_id", axum::routing::delete(revoke_role_from_user))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

// =============================================================================
// ROLE ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/roles",
    tag = "RBAC",
    responses((status = 200, description = "List of roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<Role>>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;
    Ok(Json(state.directory().list_roles().await?))
}

#[utoipa::path(
    post,
    path = "/rbac/roles",
    tag = "RBAC",
    request_body = RoleCreateRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Role name already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RoleCreateRequest>,
) -> AppResult<(StatusCode, Json<Role>)> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let role = state.directory().create_role(&req).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &role);

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role details", body = Role),
        (status = 404, description = "Role not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<Json<Role>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;
    Ok(Json(state.directory().get_role(role_id).await?))
}

#[utoipa::path(
    delete,
    path = "/rbac/roles/{role_id}",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 409, description = "Role still has active grants"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let role = state.directory().delete_role(role_id).await?;
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &role);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    responses((status = 200, description = "Permission codes currently effective for the role", body = Vec<String>)),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
) -> AppResult<Json<Vec<String>>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    state.directory().get_role(role_id).await?;
    let codes = state.directory().effective_permissions(role_id, utc_now()).await?;
    Ok(Json(codes))
}

#[utoipa::path(
    put,
    path = "/rbac/roles/{role_id}/permissions",
    tag = "RBAC",
    params(("role_id" = i64, Path, description = "Role ID")),
    request_body = ReplacePermissionsRequest,
    responses(
        (status = 204, description = "Permission set replaced"),
        (status = 404, description = "Role or permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn replace_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(role_id): Path<i64>,
    Json(req): Json<ReplacePermissionsRequest>,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    state
        .directory()
        .assign_permissions_to_role(role_id, &req.permission_ids, req.expires_at)
        .await?;

    let role = state.directory().get_role(role_id).await?;
    log_activity(&state.event_bus, "permissions_replaced", Some(auth.user_id), &role);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// PERMISSION ENDPOINTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/permissions",
    tag = "RBAC",
    responses((status = 200, description = "List of permissions", body = Vec<Permission>)),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Permission>>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;
    Ok(Json(state.catalog().list().await?))
}

#[utoipa::path(
    get,
    path = "/rbac/permissions/by-module",
    tag = "RBAC",
    responses((status = 200, description = "Permissions grouped by module")),
    security(("bearerAuth" = []))
)]
pub async fn list_permissions_by_module(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<BTreeMap<String, Vec<Permission>>>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;
    Ok(Json(state.catalog().list_by_module().await?))
}

#[utoipa::path(
    post,
    path = "/rbac/permissions",
    tag = "RBAC",
    request_body = PermissionCreateRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 409, description = "Permission code already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<PermissionCreateRequest>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let permission = state.catalog().create(&req).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &permission);

    Ok((StatusCode::CREATED, Json(permission)))
}

#[utoipa::path(
    put,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    request_body = PermissionUpdateRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Permission not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<i64>,
    Json(req): Json<PermissionUpdateRequest>,
) -> AppResult<Json<Permission>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let permission = state.catalog().update(permission_id, &req).await?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &permission);

    Ok(Json(permission))
}

#[utoipa::path(
    delete,
    path = "/rbac/permissions/{permission_id}",
    tag = "RBAC",
    params(("permission_id" = i64, Path, description = "Permission ID")),
    responses(
        (status = 204, description = "Permission deleted"),
        (status = 409, description = "Permission still referenced"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn delete_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(permission_id): Path<i64>,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let permission = state.catalog().delete(permission_id).await?;
    log_activity(&state.event_bus, "deleted", Some(auth.user_id), &permission);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// GLOBAL ROLE GRANTS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    responses((status = 200, description = "Active global roles", body = Vec<Role>)),
    security(("bearerAuth" = []))
)]
pub async fn get_user_roles(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<Vec<Role>>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;
    Ok(Json(state.directory().global_roles_of(user_id).await?))
}

#[utoipa::path(
    post,
    path = "/rbac/users/{user_id}/roles",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = GrantRoleRequest,
    responses(
        (status = 201, description = "Role granted (or reactivated)"),
        (status = 409, description = "Role already granted"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_role_to_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
    Json(req): Json<GrantRoleRequest>,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let grant = state.directory().grant_global(user_id, req.role_id).await?;
    log_activity(&state.event_bus, "granted", Some(auth.user_id), &grant);

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/roles/{role_id}",
    tag = "RBAC",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        ("role_id" = i64, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "No active grant"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role_from_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, role_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let grant = state.directory().revoke_global(user_id, role_id).await?;
    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &grant);

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(("user_id" = i64, Path, description = "User ID")),
    responses((status = 200, description = "Computed effective permissions", body = EffectivePermissionsResponse)),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<i64>,
) -> AppResult<Json<EffectivePermissionsResponse>> {
    require_permission(&state.resolver(), &auth, permissions::RBAC_MANAGE).await?;

    let roles: Vec<String> = state
        .directory()
        .global_roles_of(user_id)
        .await?
        .into_iter()
        .map(|role| role.name)
        .collect();
    let permissions = state.resolver().effective_permissions(user_id).await?;

    Ok(Json(EffectivePermissionsResponse {
        user_id,
        roles,
        permissions,
    }))
}
