use std::path::Path;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::OwnerId;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    account_type TEXT NOT NULL,
    institution TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (owner_id, name)
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    color TEXT NOT NULL DEFAULT '#6B7280',
    icon TEXT,
    parent_id INTEGER,
    is_income INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (parent_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS category_rules (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    keyword TEXT NOT NULL,
    match_type TEXT NOT NULL DEFAULT 'contains'
        CHECK (match_type IN ('contains', 'exact', 'starts_with')),
    priority INTEGER NOT NULL DEFAULT 0,
    auto_learned INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    external_id TEXT,
    date TEXT NOT NULL,
    name TEXT NOT NULL,
    merchant_name TEXT,
    amount TEXT NOT NULL,
    category_id INTEGER,
    pending INTEGER NOT NULL DEFAULT 0,
    excluded INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (account_id, external_id),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS transaction_splits (
    id INTEGER PRIMARY KEY,
    transaction_id INTEGER NOT NULL,
    category_id INTEGER,
    amount TEXT NOT NULL,
    is_excluded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE,
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS budgets (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    period TEXT NOT NULL CHECK (period IN ('weekly', 'monthly', 'yearly')),
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (owner_id, category_id, period),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_category ON transactions(category_id);
CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(date);
CREATE INDEX IF NOT EXISTS idx_splits_transaction ON transaction_splits(transaction_id);
CREATE INDEX IF NOT EXISTS idx_rules_owner ON category_rules(owner_id, priority);
";

// (name, color, is_income, parent name)
const DEFAULT_CATEGORIES: &[(&str, &str, bool, Option<&str>)] = &[
    ("Income", "#16A34A", true, None),
    ("Paycheck", "#22C55E", true, Some("Income")),
    ("Interest", "#4ADE80", true, Some("Income")),
    ("Food & Dining", "#F97316", false, None),
    ("Groceries", "#FB923C", false, Some("Food & Dining")),
    ("Restaurants", "#FDBA74", false, Some("Food & Dining")),
    ("Coffee Shops", "#C2410C", false, Some("Food & Dining")),
    ("Transportation", "#2563EB", false, None),
    ("Gas", "#3B82F6", false, Some("Transportation")),
    ("Parking", "#60A5FA", false, Some("Transportation")),
    ("Public Transit", "#93C5FD", false, Some("Transportation")),
    ("Housing", "#7C3AED", false, None),
    ("Rent", "#8B5CF6", false, Some("Housing")),
    ("Bills & Utilities", "#0891B2", false, None),
    ("Shopping", "#DB2777", false, None),
    ("Entertainment", "#CA8A04", false, None),
    ("Health & Fitness", "#DC2626", false, None),
    ("Travel", "#0D9488", false, None),
    ("Transfer", "#64748B", false, None),
    ("Other", "#6B7280", false, None),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    register_functions(&conn)?;
    Ok(conn)
}

/// SQLite's built-in `UPPER` only folds ASCII. Keyword matching in SQL goes
/// through `unicode_upper` so it agrees with `str::to_uppercase`.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_upper",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_uppercase()))
        },
    )?;
    Ok(())
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Seed the default category tree for an owner that has no categories yet.
/// Returns the number of categories inserted.
pub fn seed_default_categories(conn: &Connection, owner: OwnerId) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM categories WHERE owner_id = ?1",
        [owner],
        |row| row.get(0),
    )?;
    if count > 0 {
        return Ok(0);
    }

    // Parents precede their children in DEFAULT_CATEGORIES.
    let mut inserted = 0usize;
    for (name, color, is_income, parent) in DEFAULT_CATEGORIES {
        let parent_id: Option<i64> = match parent {
            Some(parent_name) => Some(conn.query_row(
                "SELECT id FROM categories WHERE owner_id = ?1 AND name = ?2 AND parent_id IS NULL",
                rusqlite::params![owner, parent_name],
                |row| row.get(0),
            )?),
            None => None,
        };
        conn.execute(
            "INSERT INTO categories (owner_id, name, color, parent_id, is_income) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![owner, name, color, parent_id, is_income],
        )?;
        inserted += 1;
    }
    Ok(inserted)
}

/// Amounts are stored as canonical decimal text; read one back from `idx`.
pub fn decimal_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}


#[cfg(test)]
mod tests {
    use super::testing::test_db;
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "accounts",
            "categories",
            "category_rules",
            "transactions",
            "transaction_splits",
            "budgets",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_seed_is_per_owner_and_idempotent() {
        let (_dir, conn) = test_db();
        assert_eq!(seed_default_categories(&conn, 1).unwrap(), 0);
        let seeded = seed_default_categories(&conn, 2).unwrap();
        assert_eq!(seeded, DEFAULT_CATEGORIES.len());
        let count: i64 = conn
            .query_row("SELECT count(*) FROM categories WHERE owner_id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, DEFAULT_CATEGORIES.len());
    }

    #[test]
    fn test_seed_includes_top_level_other() {
        let (_dir, conn) = test_db();
        let parent: Option<i64> = conn
            .query_row(
                "SELECT parent_id FROM categories WHERE owner_id = 1 AND name = 'Other'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(parent.is_none());
    }

    #[test]
    fn test_seeded_tree_is_two_levels() {
        let (_dir, conn) = test_db();
        let too_deep: i64 = conn
            .query_row(
                "SELECT count(*) FROM categories c JOIN categories p ON c.parent_id = p.id \
                 WHERE p.parent_id IS NOT NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(too_deep, 0);
    }

    #[test]
    fn test_decimal_column_reads_text() {
        let (_dir, conn) = test_db();
        let value = conn
            .query_row("SELECT '12.50'", [], |row| decimal_column(row, 0))
            .unwrap();
        assert_eq!(value, Decimal::new(1250, 2));
    }
}
