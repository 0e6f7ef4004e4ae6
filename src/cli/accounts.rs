use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::ledger::{create_account, list_accounts};
use crate::models::OwnerId;

pub fn add(owner: OwnerId, name: &str, account_type: &str, institution: Option<&str>) -> Result<()> {
    let conn = open_db()?;
    let account = create_account(&conn, owner, name, account_type, institution)?;
    println!("Added account {}: {}", account.id, account.name);
    Ok(())
}

pub fn list(owner: OwnerId) -> Result<()> {
    let conn = open_db()?;
    let accounts = list_accounts(&conn, owner)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Institution"]);
    for account in accounts {
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(account.name),
            Cell::new(account.account_type),
            Cell::new(account.institution.unwrap_or_default()),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}
