use chrono::NaiveDate;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::categories::get_category;
use crate::categorizer::{learn_from_categorization, match_category};
use crate::db::decimal_column;
use crate::error::{BudgieError, Result};
use crate::models::{Account, OwnerId, Transaction};

pub(crate) const TXN_COLUMNS: &str = "t.id, t.account_id, t.external_id, t.date, t.name, \
     t.merchant_name, t.amount, t.category_id, t.pending, t.excluded, t.notes";

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    pub amount: Decimal,
    pub category_id: Option<i64>,
    pub pending: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category_id: Option<i64>,
    pub uncategorized_only: bool,
    pub limit: Option<usize>,
}

pub(crate) fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        account_id: row.get(1)?,
        external_id: row.get(2)?,
        date: row.get(3)?,
        name: row.get(4)?,
        merchant_name: row.get(5)?,
        amount: decimal_column(row, 6)?,
        category_id: row.get(7)?,
        pending: row.get(8)?,
        excluded: row.get(9)?,
        notes: row.get(10)?,
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub fn create_account(
    conn: &Connection,
    owner: OwnerId,
    name: &str,
    account_type: &str,
    institution: Option<&str>,
) -> Result<Account> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BudgieError::validation("Account name is required"));
    }
    if find_account_by_name(conn, owner, name)?.is_some() {
        return Err(BudgieError::validation(format!(
            "Account name already exists: {name}"
        )));
    }
    conn.execute(
        "INSERT INTO accounts (owner_id, name, account_type, institution) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![owner, name, account_type, institution],
    )?;
    info!(owner, name, "created account");
    Ok(Account {
        id: conn.last_insert_rowid(),
        owner_id: owner,
        name: name.to_string(),
        account_type: account_type.to_string(),
        institution: institution.map(str::to_string),
    })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        account_type: row.get(3)?,
        institution: row.get(4)?,
    })
}

pub fn list_accounts(conn: &Connection, owner: OwnerId) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, owner_id, name, account_type, institution FROM accounts \
         WHERE owner_id = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map([owner], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_account_by_name(conn: &Connection, owner: OwnerId, name: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            "SELECT id, owner_id, name, account_type, institution FROM accounts \
             WHERE owner_id = ?1 AND name = ?2",
            rusqlite::params![owner, name],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub fn get_account(conn: &Connection, owner: OwnerId, id: i64) -> Result<Account> {
    conn.query_row(
        "SELECT id, owner_id, name, account_type, institution FROM accounts \
         WHERE id = ?1 AND owner_id = ?2",
        [id, owner],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| BudgieError::not_found("Account", id))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub fn get_transaction(conn: &Connection, owner: OwnerId, id: i64) -> Result<Transaction> {
    conn.query_row(
        &format!(
            "SELECT {TXN_COLUMNS} FROM transactions t JOIN accounts a ON t.account_id = a.id \
             WHERE t.id = ?1 AND a.owner_id = ?2"
        ),
        [id, owner],
        transaction_from_row,
    )
    .optional()?
    .ok_or_else(|| BudgieError::not_found("Transaction", id))
}

pub fn list_transactions(
    conn: &Connection,
    owner: OwnerId,
    filter: &TransactionFilter,
) -> Result<Vec<Transaction>> {
    let mut clauses = vec!["a.owner_id = ?1".to_string()];
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(owner)];

    if let Some(from) = filter.from {
        params.push(Box::new(from));
        clauses.push(format!("t.date >= ?{}", params.len()));
    }
    if let Some(to) = filter.to {
        params.push(Box::new(to));
        clauses.push(format!("t.date <= ?{}", params.len()));
    }
    if let Some(category_id) = filter.category_id {
        params.push(Box::new(category_id));
        clauses.push(format!(
            "(t.category_id = ?{n} OR EXISTS (SELECT 1 FROM transaction_splits s \
             WHERE s.transaction_id = t.id AND s.category_id = ?{n}))",
            n = params.len()
        ));
    }
    if filter.uncategorized_only {
        clauses.push(
            "t.category_id IS NULL AND NOT EXISTS \
             (SELECT 1 FROM transaction_splits s WHERE s.transaction_id = t.id)"
                .to_string(),
        );
    }
    let limit = filter
        .limit
        .map(|n| format!(" LIMIT {n}"))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions t JOIN accounts a ON t.account_id = a.id \
         WHERE {} ORDER BY t.date DESC, t.id DESC{limit}",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), transaction_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Manual entry. Without an explicit category the rule engine picks one.
pub fn create_transaction(conn: &Connection, owner: OwnerId, new: NewTransaction) -> Result<Transaction> {
    get_account(conn, owner, new.account_id)?;
    let name = new.name.trim();
    if name.is_empty() {
        return Err(BudgieError::validation("Transaction name is required"));
    }
    let merchant = new
        .merchant_name
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let category_id = match new.category_id {
        Some(id) => Some(get_category(conn, owner, id)?.id),
        None => match_category(conn, owner, name, merchant)?,
    };

    conn.execute(
        "INSERT INTO transactions (account_id, date, name, merchant_name, amount, category_id, pending, notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            new.account_id,
            new.date,
            name,
            merchant,
            new.amount.to_string(),
            category_id,
            new.pending,
            new.notes
        ],
    )?;
    let id = conn.last_insert_rowid();
    info!(owner, id, ?category_id, "created transaction");
    get_transaction(conn, owner, id)
}

/// Puts a transaction into single-category mode: any splits are discarded in
/// the same unit of work. Setting a category also teaches the rule engine,
/// best-effort.
pub fn categorize(
    conn: &mut Connection,
    owner: OwnerId,
    id: i64,
    category_id: Option<i64>,
    learn: bool,
) -> Result<Transaction> {
    let tx = conn.transaction()?;
    let txn = get_transaction(&tx, owner, id)?;
    if let Some(category_id) = category_id {
        get_category(&tx, owner, category_id)?;
    }
    tx.execute("DELETE FROM transaction_splits WHERE transaction_id = ?1", [id])?;
    tx.execute(
        "UPDATE transactions SET category_id = ?1, updated_at = datetime('now') WHERE id = ?2",
        rusqlite::params![category_id, id],
    )?;
    tx.commit()?;
    info!(owner, id, ?category_id, "categorized transaction");

    if let (Some(category_id), true) = (category_id, learn) {
        if let Err(e) = learn_from_categorization(
            conn,
            owner,
            &txn.name,
            txn.merchant_name.as_deref(),
            category_id,
        ) {
            warn!(owner, id, error = %e, "rule learning failed");
        }
    }

    get_transaction(conn, owner, id)
}

pub fn set_excluded(conn: &Connection, owner: OwnerId, id: i64, excluded: bool) -> Result<Transaction> {
    get_transaction(conn, owner, id)?;
    conn.execute(
        "UPDATE transactions SET excluded = ?1, updated_at = datetime('now') WHERE id = ?2",
        rusqlite::params![excluded, id],
    )?;
    info!(owner, id, excluded, "toggled exclusion");
    get_transaction(conn, owner, id)
}
