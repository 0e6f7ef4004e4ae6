use crate::categorizer::categorize_uncategorized;
use crate::cli::open_db;
use crate::error::Result;
use crate::models::OwnerId;

pub fn run(owner: OwnerId) -> Result<()> {
    let conn = open_db()?;
    let result = categorize_uncategorized(&conn, owner)?;
    println!(
        "{} categorized, {} still uncategorized",
        result.categorized, result.still_uncategorized
    );
    Ok(())
}
