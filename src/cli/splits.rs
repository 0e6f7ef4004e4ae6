use std::collections::HashMap;

use comfy_table::{Cell, Table};
use rust_decimal::Decimal;

use crate::cli::open_db;
use crate::cli::transactions::{category_label, category_names};
use crate::error::{BudgieError, Result};
use crate::fmt::money;
use crate::models::{OwnerId, TransactionSplit};
use crate::splits::{delete_splits, get_splits, save_splits, SplitLine};

/// Parses `CATEGORY_ID:AMOUNT`, `excluded:AMOUNT` or `none:AMOUNT`.
pub fn parse_split_line(raw: &str) -> Result<SplitLine> {
    let invalid = || BudgieError::validation(format!("Invalid split line: {raw}"));
    let (target, amount) = raw.split_once(':').ok_or_else(invalid)?;
    let amount: Decimal = amount.trim().parse().map_err(|_| invalid())?;
    let (category_id, is_excluded) = match target.trim() {
        "excluded" => (None, true),
        "none" => (None, false),
        id => (Some(id.parse::<i64>().map_err(|_| invalid())?), false),
    };
    Ok(SplitLine {
        category_id,
        amount,
        is_excluded,
    })
}

pub(crate) fn splits_table(splits: &[TransactionSplit], names: &HashMap<i64, String>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Split", "Category", "Amount", "Excluded"]);
    for split in splits {
        table.add_row(vec![
            Cell::new(split.id),
            Cell::new(category_label(names, split.category_id)),
            Cell::new(money(split.amount)),
            Cell::new(if split.is_excluded { "yes" } else { "" }),
        ]);
    }
    table
}

pub fn show(owner: OwnerId, transaction_id: i64) -> Result<()> {
    let conn = open_db()?;
    let splits = get_splits(&conn, owner, transaction_id)?;
    if splits.is_empty() {
        println!("Transaction {transaction_id} is not split");
        return Ok(());
    }
    let names = category_names(&conn, owner)?;
    println!("Splits of transaction {transaction_id}\n{}", splits_table(&splits, &names));
    Ok(())
}

pub fn set(owner: OwnerId, transaction_id: i64, raw_lines: &[String]) -> Result<()> {
    let lines = raw_lines
        .iter()
        .map(|l| parse_split_line(l))
        .collect::<Result<Vec<_>>>()?;
    let mut conn = open_db()?;
    let splits = save_splits(&mut conn, owner, transaction_id, &lines)?;
    let names = category_names(&conn, owner)?;
    println!("Split transaction {transaction_id}\n{}", splits_table(&splits, &names));
    Ok(())
}

pub fn clear(owner: OwnerId, transaction_id: i64) -> Result<()> {
    let conn = open_db()?;
    let deleted = delete_splits(&conn, owner, transaction_id)?;
    println!("Removed {deleted} splits; transaction {transaction_id} is uncategorized");
    Ok(())
}
