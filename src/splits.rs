use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use tracing::info;

use crate::categories::get_category;
use crate::db::decimal_column;
use crate::error::{BudgieError, Result};
use crate::ledger::get_transaction;
use crate::models::{checked_sum, OwnerId, TransactionSplit};

pub const MIN_SPLIT_LINES: usize = 2;

/// Largest accepted gap between the split total and the transaction amount.
pub fn split_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitLine {
    pub category_id: Option<i64>,
    pub amount: Decimal,
    pub is_excluded: bool,
}

fn split_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionSplit> {
    Ok(TransactionSplit {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        category_id: row.get(2)?,
        amount: decimal_column(row, 3)?,
        is_excluded: row.get(4)?,
    })
}

pub fn get_splits(conn: &Connection, owner: OwnerId, transaction_id: i64) -> Result<Vec<TransactionSplit>> {
    get_transaction(conn, owner, transaction_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, transaction_id, category_id, amount, is_excluded FROM transaction_splits \
         WHERE transaction_id = ?1 ORDER BY id",
    )?;
    let splits = stmt
        .query_map([transaction_id], split_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(splits)
}

/// Replaces the whole split set of a transaction. Validation happens before
/// anything is written; the replacement itself is one atomic unit that also
/// clears the transaction's single category.
pub fn save_splits(
    conn: &mut Connection,
    owner: OwnerId,
    transaction_id: i64,
    lines: &[SplitLine],
) -> Result<Vec<TransactionSplit>> {
    let txn = get_transaction(conn, owner, transaction_id)?;
    if lines.len() < MIN_SPLIT_LINES {
        return Err(BudgieError::validation(format!(
            "A split needs at least {MIN_SPLIT_LINES} lines"
        )));
    }
    for line in lines {
        if let Some(category_id) = line.category_id {
            get_category(conn, owner, category_id)?;
        }
    }
    let total = checked_sum(lines.iter().map(|l| l.amount))
        .ok_or_else(|| BudgieError::out_of_range("Split total"))?;
    let gap = total
        .checked_sub(txn.amount)
        .ok_or_else(|| BudgieError::out_of_range("Split total"))?;
    if gap.abs() > split_tolerance() {
        return Err(BudgieError::validation(format!(
            "Split amounts total {total} but the transaction amount is {}",
            txn.amount
        )));
    }

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM transaction_splits WHERE transaction_id = ?1",
        [transaction_id],
    )?;
    tx.execute(
        "UPDATE transactions SET category_id = NULL, updated_at = datetime('now') WHERE id = ?1",
        [transaction_id],
    )?;
    {
        let mut insert = tx.prepare(
            "INSERT INTO transaction_splits (transaction_id, category_id, amount, is_excluded) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for line in lines {
            insert.execute(rusqlite::params![
                transaction_id,
                line.category_id,
                line.amount.to_string(),
                line.is_excluded
            ])?;
        }
    }
    tx.commit()?;
    info!(owner, transaction_id, lines = lines.len(), "saved splits");

    get_splits(conn, owner, transaction_id)
}

/// Drops every split. The transaction is left without a category until the
/// caller recategorizes it.
pub fn delete_splits(conn: &Connection, owner: OwnerId, transaction_id: i64) -> Result<usize> {
    get_transaction(conn, owner, transaction_id)?;
    let deleted = conn.execute(
        "DELETE FROM transaction_splits WHERE transaction_id = ?1",
        [transaction_id],
    )?;
    info!(owner, transaction_id, deleted, "deleted splits");
    Ok(deleted)
}
