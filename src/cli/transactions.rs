use std::collections::HashMap;

use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::categories::list_categories;
use crate::cli::open_db;
use crate::error::{BudgieError, Result};
use crate::fmt::money;
use crate::ledger::{
    categorize, create_transaction, find_account_by_name, get_transaction, list_transactions, set_excluded,
    NewTransaction, TransactionFilter,
};
use crate::models::{OwnerId, Transaction};
use crate::splits::get_splits;

pub(crate) fn category_names(conn: &Connection, owner: OwnerId) -> Result<HashMap<i64, String>> {
    Ok(list_categories(conn, owner)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect())
}

pub(crate) fn category_label(names: &HashMap<i64, String>, id: Option<i64>) -> String {
    id.and_then(|id| names.get(&id).cloned()).unwrap_or_default()
}

fn has_splits(conn: &Connection, id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM transaction_splits WHERE transaction_id = ?1)",
        [id],
        |row| row.get(0),
    )?)
}

fn print_summary(txn: &Transaction, names: &HashMap<i64, String>) {
    let category = category_label(names, txn.category_id);
    println!(
        "#{} {} {} {} {}",
        txn.id,
        txn.date,
        txn.name,
        money(txn.amount),
        if category.is_empty() {
            "(uncategorized)".dimmed().to_string()
        } else {
            category
        }
    );
}

pub fn add(owner: OwnerId, account: &str, mut new: NewTransaction) -> Result<()> {
    let conn = open_db()?;
    new.account_id = find_account_by_name(&conn, owner, account)?
        .ok_or_else(|| BudgieError::NotFound(format!("Account {account}")))?
        .id;
    let txn = create_transaction(&conn, owner, new)?;
    print!("Added ");
    print_summary(&txn, &category_names(&conn, owner)?);
    Ok(())
}

pub fn set_category(owner: OwnerId, id: i64, category_id: Option<i64>, learn: bool) -> Result<()> {
    let mut conn = open_db()?;
    let txn = categorize(&mut conn, owner, id, category_id, learn)?;
    print_summary(&txn, &category_names(&conn, owner)?);
    Ok(())
}

pub fn exclude(owner: OwnerId, id: i64, excluded: bool) -> Result<()> {
    let conn = open_db()?;
    let txn = set_excluded(&conn, owner, id, excluded)?;
    let state = if txn.excluded { "excluded from" } else { "included in" };
    println!("Transaction {id} {state} budgets");
    Ok(())
}

pub fn list(owner: OwnerId, filter: TransactionFilter) -> Result<()> {
    let conn = open_db()?;
    let names = category_names(&conn, owner)?;
    let txns = list_transactions(&conn, owner, &filter)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Name", "Merchant", "Amount", "Category", "Flags"]);
    for txn in &txns {
        let category = if has_splits(&conn, txn.id)? {
            "(split)".to_string()
        } else {
            category_label(&names, txn.category_id)
        };
        let mut flags = Vec::new();
        if txn.pending {
            flags.push("pending");
        }
        if txn.excluded {
            flags.push("excluded");
        }
        table.add_row(vec![
            Cell::new(txn.id),
            Cell::new(txn.date),
            Cell::new(&txn.name),
            Cell::new(txn.merchant_name.as_deref().unwrap_or_default()),
            Cell::new(money(txn.amount)),
            Cell::new(category),
            Cell::new(flags.join(", ")),
        ]);
    }
    println!("Transactions ({})\n{table}", txns.len());
    Ok(())
}

pub fn show(owner: OwnerId, id: i64) -> Result<()> {
    let conn = open_db()?;
    let names = category_names(&conn, owner)?;
    let txn = get_transaction(&conn, owner, id)?;

    print_summary(&txn, &names);
    if let Some(merchant) = &txn.merchant_name {
        println!("  merchant: {merchant}");
    }
    if let Some(external_id) = &txn.external_id {
        println!("  external id: {external_id}");
    }
    if let Some(notes) = &txn.notes {
        println!("  notes: {notes}");
    }
    if txn.pending {
        println!("  {}", "pending".yellow());
    }
    if txn.excluded {
        println!("  {}", "excluded from budgets".yellow());
    }

    let splits = get_splits(&conn, owner, id)?;
    if !splits.is_empty() {
        println!("{}", super::splits::splits_table(&splits, &names));
    }
    Ok(())
}
