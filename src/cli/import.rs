use std::path::Path;

use crate::cli::open_db;
use crate::error::{BudgieError, Result};
use crate::importer::{source_for_file, sync};
use crate::ledger::find_account_by_name;
use crate::models::OwnerId;

pub fn run(owner: OwnerId, file: &str, account: &str, format: Option<&str>) -> Result<()> {
    let conn = open_db()?;
    let account_id = find_account_by_name(&conn, owner, account)?
        .ok_or_else(|| BudgieError::NotFound(format!("Account {account}")))?
        .id;

    let mut source = source_for_file(Path::new(file), account_id, format)?;
    let result = sync(&conn, owner, account_id, source.as_mut())?;

    println!(
        "{} added, {} updated, {} removed",
        result.added, result.updated, result.removed
    );
    println!("{} of the new transactions categorized by rules", result.categorized);
    Ok(())
}
