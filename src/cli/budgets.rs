use chrono::{Local, NaiveDate};
use colored::Colorize;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;

use crate::budgets::{delete_budget, list_budgets, update_budget, upsert_budget, BudgetPatch};
use crate::cli::open_db;
use crate::error::Result;
use crate::fmt::{money, percent};
use crate::models::{BudgetPeriod, OwnerId};

pub fn list(owner: OwnerId, date: Option<NaiveDate>) -> Result<()> {
    let conn = open_db()?;
    let today = date.unwrap_or_else(|| Local::now().date_naive());
    let progress = list_budgets(&conn, owner, today)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Category", "Period", "Range", "Budget", "Spent", "Remaining", "Used"]);
    for p in &progress {
        let used = percent(p.percentage);
        let used = if p.spent > p.budget.amount {
            used.red().bold().to_string()
        } else {
            used.green().to_string()
        };
        let remaining = if p.remaining < Decimal::ZERO {
            money(p.remaining).red().to_string()
        } else {
            money(p.remaining)
        };
        table.add_row(vec![
            Cell::new(p.budget.id),
            Cell::new(&p.category_name),
            Cell::new(p.budget.period),
            Cell::new(format!("{} .. {}", p.start, p.end)),
            Cell::new(money(p.budget.amount)),
            Cell::new(money(p.spent)),
            Cell::new(remaining),
            Cell::new(used),
        ]);
    }
    println!("Budgets as of {today}\n{table}");
    Ok(())
}

pub fn set(owner: OwnerId, category_id: i64, amount: Decimal, period: BudgetPeriod) -> Result<()> {
    let conn = open_db()?;
    let budget = upsert_budget(&conn, owner, category_id, amount, period)?;
    println!(
        "Budget {}: {} {} for category {}",
        budget.id,
        money(budget.amount),
        budget.period,
        budget.category_id
    );
    Ok(())
}

pub fn update(owner: OwnerId, id: i64, patch: BudgetPatch) -> Result<()> {
    let conn = open_db()?;
    let budget = update_budget(&conn, owner, id, patch)?;
    println!(
        "Updated budget {}: {} {} for category {}",
        budget.id,
        money(budget.amount),
        budget.period,
        budget.category_id
    );
    Ok(())
}

pub fn delete(owner: OwnerId, id: i64) -> Result<()> {
    let conn = open_db()?;
    delete_budget(&conn, owner, id)?;
    println!("Deleted budget {id}");
    Ok(())
}
