//! Query scoping contract.
//!
//! A visibility decision is translated into a declarative predicate that data
//! services append to their listing queries. Listings must intersect this with
//! any explicit caller filters and must never bypass it; this is the single
//! seam keeping row-visibility logic out of individual endpoints.

use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    /// No restriction; the Admin tier.
    AllData,
    /// Rows belonging to this set of projects. Empty means zero rows.
    ProjectSubset(Vec<i64>),
    /// Rows the principal created or is assigned to, within their projects.
    OwnedOrAssigned {
        principal_id: i64,
        project_ids: Vec<i64>,
    },
}

/// Column names of the table being scoped. `assignee` is `None` for tables
/// without an assignment concept (e.g. projects themselves), in which case the
/// owned-or-assigned predicate degrades to membership-or-creator.
#[derive(Debug, Clone, Copy)]
pub struct ScopeColumns<'a> {
    pub project_id: &'a str,
    pub created_by: &'a str,
    pub assignee: Option<&'a str>,
}

impl QueryScope {
    /// Append `" AND (...)"` for this scope to a query that already has a
    /// WHERE clause.
    pub fn push_predicate(&self, qb: &mut QueryBuilder<'_, Sqlite>, cols: &ScopeColumns<'_>) {
        match self {
            QueryScope::AllData => {}
            QueryScope::ProjectSubset(ids) => {
                qb.push(" AND ");
                push_id_membership(qb, cols.project_id, ids);
            }
            QueryScope::OwnedOrAssigned {
                principal_id,
                project_ids,
            } => match cols.assignee {
                Some(assignee) => {
                    qb.push(" AND ");
                    push_id_membership(qb, cols.project_id, project_ids);
                    qb.push(" AND (")
                        .push(cols.created_by)
                        .push(" = ")
                        .push_bind(*principal_id)
                        .push(" OR ")
                        .push(assignee)
                        .push(" = ")
                        .push_bind(*principal_id)
                        .push(")");
                }
                None => {
                    qb.push(" AND (");
                    push_id_membership(qb, cols.project_id, project_ids);
                    qb.push(" OR ")
                        .push(cols.created_by)
                        .push(" = ")
                        .push_bind(*principal_id)
                        .push(")");
                }
            },
        }
    }
}

/// `col IN (?, ...)`, or a constant-false predicate when the set is empty
/// (SQLite rejects an empty IN list).
fn push_id_membership(qb: &mut QueryBuilder<'_, Sqlite>, col: &str, ids: &[i64]) {
    if ids.is_empty() {
        qb.push("1 = 0");
        return;
    }
    qb.push(col).push(" IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(*id);
    }
    qb.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUE_COLS: ScopeColumns<'static> = ScopeColumns {
        project_id: "project_id",
        created_by: "created_by",
        assignee: Some("assignee_id"),
    };

    const PROJECT_COLS: ScopeColumns<'static> = ScopeColumns {
        project_id: "id",
        created_by: "created_by",
        assignee: None,
    };

    fn scoped_sql(scope: &QueryScope, cols: &ScopeColumns<'_>) -> String {
        let mut qb = QueryBuilder::new("SELECT * FROM t WHERE 1 = 1");
        scope.push_predicate(&mut qb, cols);
        qb.sql().to_string()
    }

    #[test]
    fn all_data_adds_nothing() {
        assert_eq!(
            scoped_sql(&QueryScope::AllData, &ISSUE_COLS),
            "SELECT * FROM t WHERE 1 = 1"
        );
    }

    #[test]
    fn project_subset_restricts_to_ids() {
        let sql = scoped_sql(&QueryScope::ProjectSubset(vec![7, 8]), &ISSUE_COLS);
        assert!(sql.contains("project_id IN ("));
    }

    #[test]
    fn empty_subset_matches_zero_rows() {
        let sql = scoped_sql(&QueryScope::ProjectSubset(vec![]), &ISSUE_COLS);
        assert!(sql.ends_with(" AND 1 = 0"));
    }

    #[test]
    fn owned_or_assigned_intersects_membership_with_ownership() {
        let scope = QueryScope::OwnedOrAssigned {
            principal_id: 3,
            project_ids: vec![7],
        };
        let sql = scoped_sql(&scope, &ISSUE_COLS);
        assert!(sql.contains("project_id IN ("));
        assert!(sql.contains("created_by = "));
        assert!(sql.contains("OR assignee_id = "));
    }

    #[test]
    fn owned_or_assigned_without_assignee_is_membership_or_creator() {
        let scope = QueryScope::OwnedOrAssigned {
            principal_id: 3,
            project_ids: vec![],
        };
        let sql = scoped_sql(&scope, &PROJECT_COLS);
        // No memberships: only self-created rows survive.
        assert!(sql.contains("(1 = 0 OR created_by = "));
    }
}
