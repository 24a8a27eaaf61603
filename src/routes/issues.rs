//! Issue endpoints.
//!
//! Every listing starts from the caller's visibility scope and intersects the
//! explicit filters on top; the scope predicate is never skipped, so there is
//! exactly one place row-visibility rules live.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::QueryBuilder;

use crate::app::AppState;
use crate::authz::{PolicyEngine, ProjectAction, ScopeColumns};
use crate::errors::{AppError, AppResult};
use crate::events::log_activity;
use crate::models::issue::{Issue, IssueCreateRequest, IssueListQuery, IssueUpdateRequest};
use crate::tokens::AuthUser;
use crate::utils::utc_now;

const ISSUE_COLUMNS: &str =
    "id, project_id, title, body, status, created_by, assignee_id, created_at, updated_at";

const ISSUE_SCOPE_COLS: ScopeColumns<'static> = ScopeColumns {
    project_id: "project_id",
    created_by: "created_by",
    assignee: Some("assignee_id"),
};

#[utoipa::path(
    get,
    path = "/projects/{project_id}/issues",
    tag = "Issues",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        IssueListQuery,
    ),
    responses((status = 200, description = "Issues visible to the caller", body = Vec<Issue>)),
    security(("bearerAuth" = []))
)]
pub async fn list_issues(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<i64>,
    Query(filter): Query<IssueListQuery>,
) -> AppResult<Json<Vec<Issue>>> {
    // Narrowing to the requested project happens inside the tier: a project
    // outside the caller's set scopes to zero rows instead of erroring.
    let tier = state
        .resolver()
        .visibility_tier(auth.user_id, Some(project_id))
        .await?;

    fetch_scoped(&state, &tier.scope(), Some(project_id), &filter).await.map(Json)
}

#[utoipa::path(
    get,
    path = "/issues",
    tag = "Issues",
    params(IssueListQuery),
    responses((status = 200, description = "Issues across all visible projects", body = Vec<Issue>)),
    security(("bearerAuth" = []))
)]
pub async fn list_all_issues(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(filter): Query<IssueListQuery>,
) -> AppResult<Json<Vec<Issue>>> {
    let tier = state.resolver().visibility_tier(auth.user_id, None).await?;
    fetch_scoped(&state, &tier.scope(), None, &filter).await.map(Json)
}

#[utoipa::path(
    post,
    path = "/projects/{project_id}/issues",
    tag = "Issues",
    params(("project_id" = i64, Path, description = "Project ID")),
    request_body = IssueCreateRequest,
    responses(
        (status = 201, description = "Issue created", body = Issue),
        (status = 403, description = "Insufficient permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(project_id): Path<i64>,
    Json(req): Json<IssueCreateRequest>,
) -> AppResult<(StatusCode, Json<Issue>)> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, project_id, ProjectAction::Member)
        .await
    {
        return Err(AppError::Forbidden);
    }

    let now = utc_now();
    let result = sqlx::query(
        r#"
        INSERT INTO issues (project_id, title, body, status, created_by, assignee_id, created_at, updated_at)
        VALUES (?, ?, ?, 'open', ?, ?, ?, ?)
        "#,
    )
    .bind(project_id)
    .bind(&req.title)
    .bind(&req.body)
    .bind(auth.user_id)
    .bind(req.assignee_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let issue = fetch_issue(&state, project_id, result.last_insert_rowid()).await?;
    log_activity(&state.event_bus, "created", Some(auth.user_id), &issue);

    Ok((StatusCode::CREATED, Json(issue)))
}

#[utoipa::path(
    get,
    path = "/projects/{project_id}/issues/{id}",
    tag = "Issues",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("id" = i64, Path, description = "Issue ID"),
    ),
    responses(
        (status = 200, description = "Issue details", body = Issue),
        (status = 403, description = "Insufficient permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, id)): Path<(i64, i64)>,
) -> AppResult<Json<Issue>> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, project_id, ProjectAction::View)
        .await
    {
        return Err(AppError::Forbidden);
    }

    let issue = fetch_issue(&state, project_id, id).await?;
    Ok(Json(issue))
}

#[utoipa::path(
    put,
    path = "/projects/{project_id}/issues/{id}",
    tag = "Issues",
    params(
        ("project_id" = i64, Path, description = "Project ID"),
        ("id" = i64, Path, description = "Issue ID"),
    ),
    request_body = IssueUpdateRequest,
    responses(
        (status = 200, description = "Issue updated", body = Issue),
        (status = 403, description = "Insufficient permission"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_issue(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((project_id, id)): Path<(i64, i64)>,
    Json(req): Json<IssueUpdateRequest>,
) -> AppResult<Json<Issue>> {
    if !state
        .resolver()
        .project_action_allowed(auth.user_id, project_id, ProjectAction::Update)
        .await
    {
        return Err(AppError::Forbidden);
    }

    let current = fetch_issue(&state, project_id, id).await?;
    let title = req.title.unwrap_or(current.title);
    let status = req.status.unwrap_or(current.status);
    // absent keeps the stored value, explicit null clears it
    let body = req.body.unwrap_or(current.body);
    let assignee_id = req.assignee_id.unwrap_or(current.assignee_id);

    sqlx::query(
        "UPDATE issues SET title = ?, body = ?, status = ?, assignee_id = ?, updated_at = ? WHERE id = ? AND project_id = ?",
    )
    .bind(&title)
    .bind(&body)
    .bind(&status)
    .bind(assignee_id)
    .bind(utc_now())
    .bind(id)
    .bind(project_id)
    .execute(&state.pool)
    .await?;

    let issue = fetch_issue(&state, project_id, id).await?;
    log_activity(&state.event_bus, "updated", Some(auth.user_id), &issue);
    Ok(Json(issue))
}

async fn fetch_scoped(
    state: &AppState,
    scope: &crate::authz::QueryScope,
    project_id: Option<i64>,
    filter: &IssueListQuery,
) -> AppResult<Vec<Issue>> {
    let mut qb = QueryBuilder::new(format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1 = 1"));
    scope.push_predicate(&mut qb, &ISSUE_SCOPE_COLS);

    if let Some(project_id) = project_id {
        qb.push(" AND project_id = ").push_bind(project_id);
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(assignee_id) = filter.assignee_id {
        qb.push(" AND assignee_id = ").push_bind(assignee_id);
    }
    qb.push(" ORDER BY id");

    Ok(qb.build_query_as::<Issue>().fetch_all(&state.pool).await?)
}

async fn fetch_issue(state: &AppState, project_id: i64, id: i64) -> AppResult<Issue> {
    sqlx::query_as::<_, Issue>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ? AND project_id = ?"
    ))
    .bind(id)
    .bind(project_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("issue not found"))
}
