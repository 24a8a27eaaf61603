//! Capability tree endpoint.
//!
//! The tree is computed from the caller's active global role grants, so it is
//! a live reflection of the role directory: revoking a role changes the next
//! response without any cache invalidation.

use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::authz::menu_tree;
use crate::errors::AppResult;
use crate::models::menu::MenuNode;
use crate::tokens::AuthUser;

#[utoipa::path(
    get,
    path = "/menus",
    tag = "Menus",
    responses((status = 200, description = "Menu tree visible to the caller", body = Vec<MenuNode>)),
    security(("bearerAuth" = []))
)]
pub async fn my_menu_tree(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<Vec<MenuNode>>> {
    let tree = menu_tree(&state.pool, auth.user_id).await?;
    Ok(Json(tree))
}
