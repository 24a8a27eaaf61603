use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::events::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Project {
    pub id: i64,
    /// Short unique key, e.g. "PLAT".
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for Project {
    fn entity_type() -> &'static str {
        "project"
    }
    fn subject_id(&self) -> Option<i64> {
        Some(self.id)
    }
    fn severity(&self) -> Severity {
        Severity::Important
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectCreateRequest {
    #[schema(example = "PLAT")]
    pub key: String,
    #[schema(example = "Platform")]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProjectUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A member of a project with the project-scoped roles they hold there.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectMember {
    pub user_id: i64,
    pub login: String,
    pub display_name: String,
    pub roles: Vec<String>,
}
