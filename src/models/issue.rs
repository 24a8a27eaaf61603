use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::events::Loggable;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Issue {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[schema(example = "open")]
    pub status: String,
    pub created_by: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Issue {
    fn entity_type() -> &'static str {
        "issue"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.id)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueCreateRequest {
    #[schema(example = "Login page 500s on empty password")]
    pub title: String,
    pub body: Option<String>,
    pub assignee_id: Option<i64>,
}

/// Nullable fields distinguish "absent" from "explicit null": an absent key
/// keeps the stored value, a null clears it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueUpdateRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub body: Option<Option<String>>,
    #[schema(example = "closed")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub assignee_id: Option<Option<i64>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Explicit caller filters for issue listings. These are intersected with the
/// visibility scope, never applied instead of it.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct IssueListQuery {
    pub status: Option<String>,
    pub assignee_id: Option<i64>,
}
