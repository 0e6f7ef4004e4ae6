use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::info;

use crate::error::{BudgieError, Result};
use crate::models::{Category, OwnerId};

pub const DEFAULT_COLOR: &str = "#6B7280";
/// Transactions of a deleted category land here when it exists.
pub const FALLBACK_CATEGORY: &str = "Other";

const CATEGORY_COLUMNS: &str = "id, owner_id, name, color, icon, parent_id, is_income";

#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub parent_id: Option<i64>,
    pub is_income: bool,
}

/// Partial update. `Some(None)` on `icon`/`parent_id` clears the field.
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
    pub parent_id: Option<Option<i64>>,
    pub is_income: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub reassigned_transactions: usize,
    pub reassigned_splits: usize,
    pub promoted_children: usize,
    pub fallback_category: Option<i64>,
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        color: row.get(3)?,
        icon: row.get(4)?,
        parent_id: row.get(5)?,
        is_income: row.get(6)?,
    })
}

fn hex_color() -> &'static Regex {
    static HEX_COLOR: OnceLock<Regex> = OnceLock::new();
    HEX_COLOR.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("static color pattern"))
}

fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BudgieError::validation("Name is required"));
    }
    Ok(trimmed.to_string())
}

fn validate_color(color: &str) -> Result<String> {
    if !hex_color().is_match(color) {
        return Err(BudgieError::validation(format!(
            "Invalid color: {color} (expected #RRGGBB)"
        )));
    }
    Ok(color.to_uppercase())
}

pub fn get_category(conn: &Connection, owner: OwnerId, id: i64) -> Result<Category> {
    conn.query_row(
        &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1 AND owner_id = ?2"),
        [id, owner],
        category_from_row,
    )
    .optional()?
    .ok_or_else(|| BudgieError::not_found("Category", id))
}

/// Top-level categories first, then children, each by name.
pub fn list_categories(conn: &Connection, owner: OwnerId) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories WHERE owner_id = ?1 \
         ORDER BY CASE WHEN parent_id IS NULL THEN 0 ELSE 1 END, name ASC"
    ))?;
    let categories = stmt
        .query_map([owner], category_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(categories)
}

pub fn child_ids(conn: &Connection, owner: OwnerId, id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM categories WHERE parent_id = ?1 AND owner_id = ?2 ORDER BY id")?;
    let ids = stmt
        .query_map([id, owner], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Checks that `parent_id` can hold `child_id` (or a new category when `None`)
/// without breaking the one-level nesting rule.
fn validate_parent(
    conn: &Connection,
    owner: OwnerId,
    parent_id: i64,
    child_id: Option<i64>,
) -> Result<()> {
    if child_id == Some(parent_id) {
        return Err(BudgieError::validation("A category cannot be its own parent"));
    }
    let parent = get_category(conn, owner, parent_id)?;
    if parent.parent_id.is_some() {
        return Err(BudgieError::validation(format!(
            "Cannot nest under '{}': categories may only be one level deep",
            parent.name
        )));
    }
    if let Some(child) = child_id {
        if !child_ids(conn, owner, child)?.is_empty() {
            return Err(BudgieError::validation(
                "A category with subcategories cannot be moved under another category",
            ));
        }
    }
    Ok(())
}

pub fn create_category(conn: &Connection, owner: OwnerId, new: NewCategory) -> Result<Category> {
    let name = validate_name(&new.name)?;
    let color = validate_color(new.color.as_deref().unwrap_or(DEFAULT_COLOR))?;
    if let Some(parent_id) = new.parent_id {
        validate_parent(conn, owner, parent_id, None)?;
    }
    conn.execute(
        "INSERT INTO categories (owner_id, name, color, icon, parent_id, is_income) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![owner, name, color, new.icon, new.parent_id, new.is_income],
    )?;
    let id = conn.last_insert_rowid();
    info!(owner, id, name = %name, "created category");
    get_category(conn, owner, id)
}

pub fn update_category(
    conn: &Connection,
    owner: OwnerId,
    id: i64,
    patch: CategoryPatch,
) -> Result<Category> {
    let mut category = get_category(conn, owner, id)?;

    if let Some(name) = patch.name {
        category.name = validate_name(&name)?;
    }
    if let Some(color) = patch.color {
        category.color = validate_color(&color)?;
    }
    if let Some(icon) = patch.icon {
        category.icon = icon;
    }
    if let Some(parent_id) = patch.parent_id {
        if let Some(parent) = parent_id {
            validate_parent(conn, owner, parent, Some(id))?;
        }
        category.parent_id = parent_id;
    }
    if let Some(is_income) = patch.is_income {
        category.is_income = is_income;
    }

    conn.execute(
        "UPDATE categories SET name = ?1, color = ?2, icon = ?3, parent_id = ?4, is_income = ?5 \
         WHERE id = ?6 AND owner_id = ?7",
        rusqlite::params![
            category.name,
            category.color,
            category.icon,
            category.parent_id,
            category.is_income,
            id,
            owner
        ],
    )?;
    info!(owner, id, "updated category");
    Ok(category)
}

/// Deletes a category. Its transactions and splits move to the owner's
/// top-level "Other" category (or to none), children become top-level, and
/// rules and budgets targeting it are removed. All in one transaction.
pub fn delete_category(conn: &mut Connection, owner: OwnerId, id: i64) -> Result<DeleteOutcome> {
    let tx = conn.transaction()?;
    get_category(&tx, owner, id)?;

    let fallback_category: Option<i64> = tx
        .query_row(
            "SELECT id FROM categories \
             WHERE owner_id = ?1 AND name = ?2 AND parent_id IS NULL AND id != ?3 \
             ORDER BY id LIMIT 1",
            rusqlite::params![owner, FALLBACK_CATEGORY, id],
            |row| row.get(0),
        )
        .optional()?;

    let reassigned_transactions = tx.execute(
        "UPDATE transactions SET category_id = ?1, updated_at = datetime('now') \
         WHERE category_id = ?2 AND account_id IN (SELECT id FROM accounts WHERE owner_id = ?3)",
        rusqlite::params![fallback_category, id, owner],
    )?;
    let reassigned_splits = tx.execute(
        "UPDATE transaction_splits SET category_id = ?1 \
         WHERE category_id = ?2 AND transaction_id IN ( \
             SELECT t.id FROM transactions t JOIN accounts a ON t.account_id = a.id \
             WHERE a.owner_id = ?3)",
        rusqlite::params![fallback_category, id, owner],
    )?;
    let promoted_children = tx.execute(
        "UPDATE categories SET parent_id = NULL WHERE parent_id = ?1 AND owner_id = ?2",
        [id, owner],
    )?;
    tx.execute(
        "DELETE FROM category_rules WHERE category_id = ?1 AND owner_id = ?2",
        [id, owner],
    )?;
    tx.execute(
        "DELETE FROM budgets WHERE category_id = ?1 AND owner_id = ?2",
        [id, owner],
    )?;
    tx.execute(
        "DELETE FROM categories WHERE id = ?1 AND owner_id = ?2",
        [id, owner],
    )?;
    tx.commit()?;

    info!(
        owner,
        id, reassigned_transactions, reassigned_splits, promoted_children, "deleted category"
    );
    Ok(DeleteOutcome {
        reassigned_transactions,
        reassigned_splits,
        promoted_children,
        fallback_category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_account, add_txn, category_id, test_db};

    fn new_category(name: &str, parent_id: Option<i64>) -> NewCategory {
        NewCategory {
            name: name.to_string(),
            parent_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_list_categories_top_level_first() {
        let (_dir, conn) = test_db();
        let categories = list_categories(&conn, 1).unwrap();
        assert!(!categories.is_empty());
        let first_child = categories.iter().position(|c| c.parent_id.is_some()).unwrap();
        let last_top = categories.iter().rposition(|c| c.parent_id.is_none()).unwrap();
        assert!(last_top < first_child);
    }

    #[test]
    fn test_list_is_scoped_to_owner() {
        let (_dir, conn) = test_db();
        assert!(list_categories(&conn, 2).unwrap().is_empty());
    }

    #[test]
    fn test_create_child_category() {
        let (_dir, conn) = test_db();
        let shopping = category_id(&conn, 1, "Shopping");
        let cat = create_category(&conn, 1, new_category("Books", Some(shopping))).unwrap();
        assert_eq!(cat.parent_id, Some(shopping));
        assert_eq!(cat.color, DEFAULT_COLOR);
    }

    #[test]
    fn test_create_rejects_grandchild() {
        let (_dir, conn) = test_db();
        let groceries = category_id(&conn, 1, "Groceries");
        let err = create_category(&conn, 1, new_category("Produce", Some(groceries))).unwrap_err();
        assert!(matches!(err, BudgieError::Validation(_)));
        assert!(err.to_string().contains("one level deep"));
    }

    #[test]
    fn test_create_rejects_foreign_parent() {
        let (_dir, conn) = test_db();
        let shopping = category_id(&conn, 1, "Shopping");
        let err = create_category(&conn, 2, new_category("Books", Some(shopping))).unwrap_err();
        assert!(matches!(err, BudgieError::NotFound(_)));
    }

    #[test]
    fn test_create_validates_name_and_color() {
        let (_dir, conn) = test_db();
        let err = create_category(&conn, 1, new_category("  ", None)).unwrap_err();
        assert!(err.to_string().contains("Name is required"));
        let bad_color = NewCategory {
            name: "Pets".to_string(),
            color: Some("red".to_string()),
            ..Default::default()
        };
        let err = create_category(&conn, 1, bad_color).unwrap_err();
        assert!(err.to_string().contains("Invalid color"));
    }

    #[test]
    fn test_update_rejects_self_parent() {
        let (_dir, conn) = test_db();
        let shopping = category_id(&conn, 1, "Shopping");
        let patch = CategoryPatch {
            parent_id: Some(Some(shopping)),
            ..Default::default()
        };
        let err = update_category(&conn, 1, shopping, patch).unwrap_err();
        assert!(err.to_string().contains("its own parent"));
    }

    #[test]
    fn test_update_rejects_parent_with_children() {
        let (_dir, conn) = test_db();
        let food = category_id(&conn, 1, "Food & Dining");
        let shopping = category_id(&conn, 1, "Shopping");
        let patch = CategoryPatch {
            parent_id: Some(Some(shopping)),
            ..Default::default()
        };
        let err = update_category(&conn, 1, food, patch).unwrap_err();
        assert!(err.to_string().contains("subcategories"));
        assert_eq!(get_category(&conn, 1, food).unwrap().parent_id, None);
    }

    #[test]
    fn test_update_partial_fields_and_clear_parent() {
        let (_dir, conn) = test_db();
        let coffee = category_id(&conn, 1, "Coffee Shops");
        let patch = CategoryPatch {
            name: Some("Cafes".to_string()),
            icon: Some(Some("cup".to_string())),
            parent_id: Some(None),
            ..Default::default()
        };
        let cat = update_category(&conn, 1, coffee, patch).unwrap();
        assert_eq!(cat.name, "Cafes");
        assert_eq!(cat.icon.as_deref(), Some("cup"));
        assert_eq!(cat.parent_id, None);
        assert!(!cat.is_income);
    }

    #[test]
    fn test_depth_never_exceeds_two_after_updates() {
        let (_dir, conn) = test_db();
        let gas = category_id(&conn, 1, "Gas");
        let parking = category_id(&conn, 1, "Parking");
        let patch = CategoryPatch {
            parent_id: Some(Some(gas)),
            ..Default::default()
        };
        assert!(update_category(&conn, 1, parking, patch).is_err());
        for cat in list_categories(&conn, 1).unwrap() {
            if cat.parent_id.is_some() {
                assert!(child_ids(&conn, 1, cat.id).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn test_delete_promotes_children() {
        let (_dir, mut conn) = test_db();
        let transport = category_id(&conn, 1, "Transportation");
        let extra = create_category(&conn, 1, new_category("Tolls", Some(transport))).unwrap();
        let children_before = child_ids(&conn, 1, transport).unwrap();
        assert!(children_before.len() >= 2);

        let outcome = delete_category(&mut conn, 1, transport).unwrap();
        assert_eq!(outcome.promoted_children, children_before.len());
        for child in children_before {
            let cat = get_category(&conn, 1, child).unwrap();
            assert_eq!(cat.parent_id, None);
        }
        assert!(get_category(&conn, 1, extra.id).is_ok());
        assert!(matches!(
            get_category(&conn, 1, transport).unwrap_err(),
            BudgieError::NotFound(_)
        ));
    }

    #[test]
    fn test_delete_reassigns_transactions_to_other() {
        let (_dir, mut conn) = test_db();
        let shopping = category_id(&conn, 1, "Shopping");
        let other = category_id(&conn, 1, "Other");
        let acct = add_account(&conn, 1, "Checking");
        let txn = add_txn(&conn, acct, "2026-01-05", "TARGET", "20.00", Some(shopping));

        let outcome = delete_category(&mut conn, 1, shopping).unwrap();
        assert_eq!(outcome.fallback_category, Some(other));
        assert_eq!(outcome.reassigned_transactions, 1);
        let cat: Option<i64> = conn
            .query_row("SELECT category_id FROM transactions WHERE id = ?1", [txn], |r| r.get(0))
            .unwrap();
        assert_eq!(cat, Some(other));
    }

    #[test]
    fn test_delete_other_clears_category() {
        let (_dir, mut conn) = test_db();
        let other = category_id(&conn, 1, "Other");
        let acct = add_account(&conn, 1, "Checking");
        let txn = add_txn(&conn, acct, "2026-01-05", "MISC", "5.00", Some(other));

        let outcome = delete_category(&mut conn, 1, other).unwrap();
        assert_eq!(outcome.fallback_category, None);
        let cat: Option<i64> = conn
            .query_row("SELECT category_id FROM transactions WHERE id = ?1", [txn], |r| r.get(0))
            .unwrap();
        assert_eq!(cat, None);
    }

    #[test]
    fn test_delete_removes_rules_and_budgets() {
        let (_dir, mut conn) = test_db();
        let travel = category_id(&conn, 1, "Travel");
        conn.execute(
            "INSERT INTO category_rules (owner_id, category_id, keyword) VALUES (1, ?1, 'DELTA')",
            [travel],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO budgets (owner_id, category_id, amount, period) VALUES (1, ?1, '300', 'monthly')",
            [travel],
        )
        .unwrap();
        delete_category(&mut conn, 1, travel).unwrap();
        let rules: i64 = conn
            .query_row("SELECT count(*) FROM category_rules", [], |r| r.get(0))
            .unwrap();
        let budgets: i64 = conn
            .query_row("SELECT count(*) FROM budgets", [], |r| r.get(0))
            .unwrap();
        assert_eq!((rules, budgets), (0, 0));
    }

    #[test]
    fn test_delete_foreign_category_is_not_found() {
        let (_dir, mut conn) = test_db();
        let travel = category_id(&conn, 1, "Travel");
        let err = delete_category(&mut conn, 2, travel).unwrap_err();
        assert!(matches!(err, BudgieError::NotFound(_)));
        assert!(get_category(&conn, 1, travel).is_ok());
    }
}
