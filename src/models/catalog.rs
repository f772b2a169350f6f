//! Read-only lookup catalogs seeded at startup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RuleType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatRule {
    pub id: i64,
    pub code: String,
    pub name: String,
    /// Regular expression the value has to match
    pub pattern: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCategory {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTemplate {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub rule_type: RuleType,
    pub template_expression: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataElementCategory {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub parent_id: Option<i64>,
    pub sort_order: i32,
    pub description: Option<String>,
}

/// One node of the category tree returned by `/api/data-element-categories`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: DataElementCategory,
    pub children: Vec<CategoryNode>,
}

/// Assemble a flat category list into a forest, siblings ordered by `sort_order`.
///
/// Categories whose parent is missing from the list are dropped, same as
/// categories that can only be reached through a cycle.
pub fn build_category_tree(mut categories: Vec<DataElementCategory>) -> Vec<CategoryNode> {
    categories.sort_by_key(|c| (c.sort_order, c.id));
    children_of(None, &categories, 0)
}

fn children_of(parent: Option<i64>, all: &[DataElementCategory], depth: usize) -> Vec<CategoryNode> {
    if depth > all.len() {
        return Vec::new();
    }
    all.iter()
        .filter(|c| c.parent_id == parent)
        .map(|c| CategoryNode {
            category: c.clone(),
            children: children_of(Some(c.id), all, depth + 1),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn category(id: i64, parent_id: Option<i64>, sort_order: i32) -> DataElementCategory {
        DataElementCategory {
            id,
            code: format!("C{}", id),
            name: format!("分类{}", id),
            parent_id,
            sort_order,
            description: None,
        }
    }

    #[test]
    fn test_tree_nests_children_in_sort_order() {
        let tree = build_category_tree(vec![
            category(3, Some(1), 2),
            category(1, None, 1),
            category(2, Some(1), 1),
            category(4, None, 0),
        ]);

        let roots: Vec<i64> = tree.iter().map(|n| n.category.id).collect();
        assert_eq!(roots, vec![4, 1]);

        let children: Vec<i64> = tree[1].children.iter().map(|n| n.category.id).collect();
        assert_eq!(children, vec![2, 3]);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_tree_ignores_cycles() {
        let tree = build_category_tree(vec![category(1, Some(2), 0), category(2, Some(1), 0)]);
        assert!(tree.is_empty());
    }
}
