use comfy_table::{Cell, Table};

use crate::categorizer::{
    apply_rule_to_existing, create_rule, delete_rule, list_rules, update_rule, NewRule, RulePatch, SavedRule,
};
use crate::cli::open_db;
use crate::cli::transactions::category_names;
use crate::error::Result;
use crate::models::{MatchType, OwnerId};

fn report(verb: &str, saved: &SavedRule) {
    println!(
        "{verb} rule {}: '{}' \u{2192} category {}",
        saved.rule.id, saved.rule.keyword, saved.rule.category_id
    );
    if let Some(applied) = saved.applied {
        println!("Re-categorized {applied} existing transactions");
    }
}

pub fn add(
    owner: OwnerId,
    keywords: Vec<String>,
    category_id: i64,
    match_type: MatchType,
    priority: i64,
    apply: bool,
) -> Result<()> {
    let conn = open_db()?;
    let saved = create_rule(
        &conn,
        owner,
        NewRule {
            category_id,
            keywords,
            match_type,
            priority,
            apply_to_existing: apply,
        },
    )?;
    report("Added", &saved);
    Ok(())
}

pub fn list(owner: OwnerId) -> Result<()> {
    let conn = open_db()?;
    let names = category_names(&conn, owner)?;
    let rules = list_rules(&conn, owner)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Keywords", "Type", "Category", "Priority", "Learned"]);
    for rule in rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(rule.keywords().collect::<Vec<_>>().join(" | ")),
            Cell::new(rule.match_type),
            Cell::new(names.get(&rule.category_id).map(String::as_str).unwrap_or("?")),
            Cell::new(rule.priority),
            Cell::new(if rule.auto_learned { "yes" } else { "" }),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}

pub fn update(owner: OwnerId, id: i64, patch: RulePatch) -> Result<()> {
    let conn = open_db()?;
    let saved = update_rule(&conn, owner, id, patch)?;
    report("Updated", &saved);
    Ok(())
}

pub fn delete(owner: OwnerId, id: i64) -> Result<()> {
    let conn = open_db()?;
    delete_rule(&conn, owner, id)?;
    println!("Deleted rule {id}");
    Ok(())
}

pub fn apply(owner: OwnerId, keywords: &[String], category_id: i64, match_type: MatchType) -> Result<()> {
    let conn = open_db()?;
    let affected = apply_rule_to_existing(&conn, owner, keywords, match_type, category_id)?;
    println!("Re-categorized {affected} transactions");
    Ok(())
}
