use std::path::PathBuf;

use colored::Colorize;

use crate::db::{get_connection, init_db, seed_default_categories};
use crate::error::Result;
use crate::models::OwnerId;
use crate::settings::{load_settings, save_settings, shellexpand_path, DB_FILE};

pub fn run(data_dir: Option<String>, owner: OwnerId) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;

    let conn = get_connection(&resolved.join(DB_FILE))?;
    init_db(&conn)?;
    let seeded = seed_default_categories(&conn, owner)?;

    println!("{} budgie at {}", "Initialized".green(), resolved.display());
    if seeded > 0 {
        println!("Seeded {seeded} default categories for owner {owner}");
    }
    Ok(())
}
