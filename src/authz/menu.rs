//! Capability tree: the permitted menu entries for a principal, assembled
//! into a parent/child tree.
//!
//! Entries are reachable through active **global** role grants only;
//! project-scoped roles do not contribute menu entries. Invisible entries are
//! filtered before assembly, so a visible parent whose children are all
//! filtered out is emitted as a leaf.

use std::collections::{HashMap, HashSet};

use sqlx::SqlitePool;

use crate::errors::AppResult;
use crate::models::menu::{MenuNode, MenuRow};

pub async fn menu_tree(pool: &SqlitePool, principal_id: i64) -> AppResult<Vec<MenuNode>> {
    let rows: Vec<MenuRow> = sqlx::query_as(
        r#"
        SELECT DISTINCT m.id, m.parent_id, m.title, m.path, m.sort_order, m.is_visible
        FROM menu_entries m
        INNER JOIN role_menu_grants rmg ON rmg.menu_id = m.id
        INNER JOIN global_role_grants g ON g.role_id = rmg.role_id AND g.is_active = 1
        WHERE g.user_id = ? AND m.is_visible = 1
        ORDER BY m.sort_order, m.id
        "#,
    )
    .bind(principal_id)
    .fetch_all(pool)
    .await?;

    Ok(assemble(rows))
}

/// Group children under parents over an id-keyed arena. Rows whose parent is
/// absent (not granted, invisible, or a self-reference) are promoted to roots
/// rather than dropped. Input order (sort key) is preserved.
fn assemble(rows: Vec<MenuRow>) -> Vec<MenuNode> {
    let present: HashSet<i64> = rows.iter().map(|row| row.id).collect();

    let mut order: Vec<i64> = Vec::new();
    let mut roots: Vec<i64> = Vec::new();
    let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut arena: HashMap<i64, MenuNode> = HashMap::new();

    for row in rows {
        order.push(row.id);
        match row.parent_id {
            Some(parent) if parent != row.id && present.contains(&parent) => {
                children_of.entry(parent).or_default().push(row.id);
            }
            _ => roots.push(row.id),
        }
        arena.insert(
            row.id,
            MenuNode {
                id: row.id,
                title: row.title,
                path: row.path,
                sort_order: row.sort_order,
                children: Vec::new(),
            },
        );
    }

    let mut tree: Vec<MenuNode> = roots
        .into_iter()
        .filter_map(|id| build(id, &mut arena, &children_of))
        .collect();

    // Anything still in the arena sits on a parent-reference cycle and was
    // unreachable from a root; emit those subtrees at the top level.
    for id in order {
        if let Some(node) = build(id, &mut arena, &children_of) {
            tree.push(node);
        }
    }

    tree
}

/// Removing from the arena doubles as the visited set, so cyclic parent links
/// cannot recurse forever.
fn build(
    id: i64,
    arena: &mut HashMap<i64, MenuNode>,
    children_of: &HashMap<i64, Vec<i64>>,
) -> Option<MenuNode> {
    let mut node = arena.remove(&id)?;
    if let Some(child_ids) = children_of.get(&id) {
        for child_id in child_ids {
            if let Some(child) = build(*child_id, arena, children_of) {
                node.children.push(child);
            }
        }
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, parent_id: Option<i64>, title: &str, sort_order: i64) -> MenuRow {
        MenuRow {
            id,
            parent_id,
            title: title.to_string(),
            path: None,
            sort_order,
            is_visible: true,
        }
    }

    #[test]
    fn children_nest_under_parents_in_sort_order() {
        let tree = assemble(vec![
            row(1, None, "Dashboard", 10),
            row(3, None, "Administration", 90),
            row(4, Some(3), "Roles", 10),
            row(5, Some(3), "Permissions", 20),
        ]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].title, "Dashboard");
        assert_eq!(tree[1].title, "Administration");
        let admin_children: Vec<_> = tree[1].children.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(admin_children, ["Roles", "Permissions"]);
    }

    #[test]
    fn parent_with_all_children_filtered_is_a_leaf() {
        // Children were filtered out upstream (invisible / not granted); only
        // the parent row arrives.
        let tree = assemble(vec![row(3, None, "Administration", 90)]);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn orphaned_child_is_promoted_to_root() {
        let tree = assemble(vec![row(4, Some(3), "Roles", 10)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].title, "Roles");
    }

    #[test]
    fn self_referential_entry_does_not_recurse() {
        let tree = assemble(vec![row(1, Some(1), "Loop", 10)]);
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn grandchildren_are_attached_before_their_parent_moves() {
        let tree = assemble(vec![
            row(1, None, "Top", 10),
            row(2, Some(1), "Mid", 10),
            row(3, Some(2), "Leaf", 10),
        ]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].children.len(), 1);
        assert_eq!(tree[0].children[0].children[0].title, "Leaf");
    }
}
