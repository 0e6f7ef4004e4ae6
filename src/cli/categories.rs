use comfy_table::{Cell, Table};

use crate::categories::{
    create_category, delete_category, list_categories, update_category, CategoryPatch, NewCategory,
};
use crate::cli::open_db;
use crate::error::Result;
use crate::models::{Category, OwnerId};

fn category_row(cat: &Category, indent: bool) -> Vec<Cell> {
    let name = if indent {
        format!("  \u{2514} {}", cat.name)
    } else {
        cat.name.clone()
    };
    vec![
        Cell::new(cat.id),
        Cell::new(name),
        Cell::new(&cat.color),
        Cell::new(cat.icon.as_deref().unwrap_or_default()),
        Cell::new(if cat.is_income { "income" } else { "" }),
    ]
}

pub fn list(owner: OwnerId) -> Result<()> {
    let conn = open_db()?;
    let categories = list_categories(&conn, owner)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Color", "Icon", "Kind"]);
    for parent in categories.iter().filter(|c| c.parent_id.is_none()) {
        table.add_row(category_row(parent, false));
        for child in categories.iter().filter(|c| c.parent_id == Some(parent.id)) {
            table.add_row(category_row(child, true));
        }
    }
    println!("Categories\n{table}");
    Ok(())
}

pub fn add(owner: OwnerId, new: NewCategory) -> Result<()> {
    let conn = open_db()?;
    let cat = create_category(&conn, owner, new)?;
    println!("Added category {}: {}", cat.id, cat.name);
    Ok(())
}

pub fn update(owner: OwnerId, id: i64, patch: CategoryPatch) -> Result<()> {
    let conn = open_db()?;
    let cat = update_category(&conn, owner, id, patch)?;
    println!("Updated category {}: {}", cat.id, cat.name);
    Ok(())
}

pub fn delete(owner: OwnerId, id: i64) -> Result<()> {
    let mut conn = open_db()?;
    let outcome = delete_category(&mut conn, owner, id)?;
    println!("Deleted category {id}");
    if outcome.reassigned_transactions + outcome.reassigned_splits > 0 {
        let target = if outcome.fallback_category.is_some() {
            "Other"
        } else {
            "uncategorized"
        };
        println!(
            "  {} transactions and {} split lines moved to {target}",
            outcome.reassigned_transactions, outcome.reassigned_splits
        );
    }
    if outcome.promoted_children > 0 {
        println!("  {} subcategories are now top-level", outcome.promoted_children);
    }
    Ok(())
}
