use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Flat menu row as stored; `parent_id` references another entry, which is how
/// the tree is persisted without recursive structure in the schema.
#[derive(Debug, Clone, FromRow)]
pub struct MenuRow {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub path: Option<String>,
    pub sort_order: i64,
    pub is_visible: bool,
}

/// Assembled capability tree node returned to the UI.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MenuNode {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub sort_order: i64,
    pub children: Vec<MenuNode>,
}
