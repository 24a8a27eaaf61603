//! Project endpoints.
//!
//! Listing goes through the query-scoping contract; single-entity access and
//! mutations go through `project_action_allowed`. Membership management is a
//! thin layer over the role directory, which owns the grant lifecycle rules.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::QueryBuilder;

use crate::app::AppState;
use crate::authz::{roles, PolicyEngine, ProjectAction, ScopeColumns};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::project::{
    Project, ProjectCreateRequest, ProjectMember, ProjectUpdateRequest,
};
use crate::models::rbac::AddMemberRequest;
use crate::tokens::AuthUser;
use crate::utils::utc_now;

const PROJECT_COLUMNS: &str = "id, key, name, description, created_by, created_at, updated_at";

const PROJECT_SCOPE_COLS: ScopeColumns<'static> = ScopeColumns {
    project_id: "id",
    created_by: "created_by",
    assignee: None,
};

#[utoipa::path(
    get,
    path = "/projects",
    tag = "Projects",
    responses((status = 200, description = "Projects visible to the caller", body = Vec<Project>)),
    security(("bearerAuth" = []))
)]
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<Project>>> {
    let tier = state.resolver().visibility_tier(auth.user_id, None).await?;
    let scope = tier.scope();

    let mut qb = QueryBuilder::new(format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE 1 = 1"
    ));
    scope.push_predicate(&mut qb, &PROJECT_SCOPE_COLS);
    qb.push(" ORDER BY key");

    let projects = qb.build_query_as::<Project>().fetch_all(&state.pool).await?;
    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/projects",
    tag = "Projects",
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 403, description = "Caller may not create projects"),
        (status = 409, description = "Project key already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    crate::authz::require_permission(&state.resolver(), &auth, crate::authz::permissions::PROJECT_CREATE)
        .await?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE key = ?")
        .bind(&req.key)
        .fetch_one(&state.pool)
        .await?;
    if count > 0 {
        return Err(AppError::conflict("project key already exists"));
    }

    let now = utc_now();
    let result = sqlx::query(
        "INSERT INTO projects (key, name, description, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&req.key)
    .bind(&req.name)
    .bind(&req.description)
    .bind(auth.user_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;
    let project_id = result.last_insert_rowid();

    // Creator becomes the project-local admin.
    let admin_role: i64 =
        sqlx::query_scalar("SELECT id FROM roles WHERE name = ? AND kind = 'project'")
            .bind(roles::PROJECT_LOCAL_ADMIN)
            .fetch_one(&state.pool)
            .await?;
    state
        .directory()
        .grant_project(project_id, auth.user_id, admin_role)
        .await?;

    let project = fetch_project(&state, project_id).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &project);

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Project details", body = Project),
        (status = 403, description = "Insufficient permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Project>> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, id, ProjectAction::View)
        .await
    {
        return Err(AppError::Forbidden);
    }

    let project = fetch_project(&state, id).await?;
    Ok(Json(project))
}

#[utoipa::path(
    put,
    path = "/projects/{id}",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project ID")),
    request_body = ProjectUpdateRequest,
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 403, description = "Insufficient permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, id, ProjectAction::Update)
        .await
    {
        return Err(AppError::Forbidden);
    }

    let current = fetch_project(&state, id).await?;
    let name = req.name.unwrap_or(current.name);
    let description = req.description.or(current.description);

    sqlx::query("UPDATE projects SET name = ?, description = ?, updated_at = ? WHERE id = ?")
        .bind(&name)
        .bind(&description)
        .bind(utc_now())
        .bind(id)
        .execute(&state.pool)
        .await?;

    let project = fetch_project(&state, id).await?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &project);
    Ok(Json(project))
}

// =============================================================================
// MEMBERSHIP
// =============================================================================

#[utoipa::path(
    get,
    path = "/projects/{id}/members",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project ID")),
    responses((status = 200, description = "Members and their project roles", body = Vec<ProjectMember>)),
    security(("bearerAuth" = []))
)]
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<ProjectMember>>> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, id, ProjectAction::View)
        .await
    {
        return Err(AppError::Forbidden);
    }

    Ok(Json(state.directory().members_of(id).await?))
}

#[utoipa::path(
    post,
    path = "/projects/{id}/members",
    tag = "Projects",
    params(("id" = i64, Path, description = "Project ID")),
    request_body = AddMemberRequest,
    responses(
        (status = 201, description = "Member role granted"),
        (status = 409, description = "Role already granted"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> AppResult<StatusCode> {
    require_project_admin(&state, &auth, id).await?;

    let grant = state
        .directory()
        .grant_project(id, req.user_id, req.role_id)
        .await?;
    log_activity(&state.event_bus, "granted", Some(auth.user_id), &grant);

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/members/{user_id}/roles/{role_id}",
    tag = "Projects",
    params(
        ("id" = i64, Path, description = "Project ID"),
        ("user_id" = i64, Path, description = "User ID"),
        ("role_id" = i64, Path, description = "Role ID"),
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 409, description = "Cannot revoke the member's last role"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_member_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, user_id, role_id)): Path<(i64, i64, i64)>,
) -> AppResult<StatusCode> {
    require_project_admin(&state, &auth, id).await?;

    let grant = state.directory().revoke_project(id, user_id, role_id).await?;
    log_activity(&state.event_bus, "revoked", Some(auth.user_id), &grant);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/projects/{id}/members/{user_id}",
    tag = "Projects",
    params(
        ("id" = i64, Path, description = "Project ID"),
        ("user_id" = i64, Path, description = "User ID"),
    ),
    responses((status = 204, description = "Membership removed, all roles cleared")),
    security(("bearerAuth" = []))
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, user_id)): Path<(i64, i64)>,
) -> AppResult<StatusCode> {
    require_project_admin(&state, &auth, id).await?;

    state.directory().remove_membership(id, user_id).await?;
    tracing::info!(project_id = id, user_id, actor = auth.user_id, "membership removed");

    Ok(StatusCode::NO_CONTENT)
}

async fn require_project_admin(state: &AppState, auth: &AuthUser, project_id: i64) -> AppResult<()> {
    if state
        .resolver()
        .project_action_allowed(auth.user_id, project_id, ProjectAction::Admin)
        .await
    {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

async fn fetch_project(state: &AppState, id: i64) -> AppResult<Project> {
    sqlx::query_as::<_, Project>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("project not found"))
}
