use chrono::{Datelike, Duration, Months, NaiveDate};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::info;

use crate::categories::{child_ids, get_category};
use crate::db::decimal_column;
use crate::error::{BudgieError, Result};
use crate::models::{checked_sum, Budget, BudgetPeriod, OwnerId};

const BUDGET_COLUMNS: &str = "id, owner_id, category_id, amount, period";

#[derive(Debug, Clone, Default)]
pub struct BudgetPatch {
    pub category_id: Option<i64>,
    pub amount: Option<Decimal>,
    pub period: Option<BudgetPeriod>,
}

/// The three sums that make up a budget's spend for one period.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpendBreakdown {
    /// Non-excluded transactions assigned to the category set.
    pub direct: Decimal,
    /// The part of `direct` whose transactions also carry splits.
    pub split_parents: Decimal,
    /// Non-excluded split lines assigned to the category set.
    pub splits: Decimal,
}

impl SpendBreakdown {
    pub fn spent(&self) -> Result<Decimal> {
        self.direct
            .checked_sub(self.split_parents)
            .and_then(|d| d.checked_add(self.splits))
            .ok_or_else(|| BudgieError::out_of_range("Budget spend"))
    }
}

#[derive(Debug, Clone)]
pub struct BudgetProgress {
    pub budget: Budget,
    pub category_name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub spent: Decimal,
    pub remaining: Decimal,
    pub percentage: Decimal,
}

fn budget_from_row(row: &Row<'_>) -> rusqlite::Result<Budget> {
    let period: String = row.get(4)?;
    let period = period.parse::<BudgetPeriod>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Budget {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        category_id: row.get(2)?,
        amount: decimal_column(row, 3)?,
        period,
    })
}

/// Calendar bounds (inclusive) of the period containing `reference`.
/// Weeks run Monday through Sunday.
pub fn period_range(period: BudgetPeriod, reference: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        BudgetPeriod::Weekly => {
            let offset = reference.weekday().num_days_from_monday() as i64;
            let start = reference - Duration::days(offset);
            (start, start + Duration::days(6))
        }
        BudgetPeriod::Monthly => {
            let start = reference - Duration::days(reference.day0() as i64);
            (start, start + Months::new(1) - Duration::days(1))
        }
        BudgetPeriod::Yearly => {
            let start = reference - Duration::days(reference.ordinal0() as i64);
            (start, start + Months::new(12) - Duration::days(1))
        }
    }
}

/// `spent / amount * 100` to one decimal place, unclamped. Zero when the
/// budget amount is not positive.
pub fn percentage(spent: Decimal, amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }
    spent
        .checked_div(amount)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .map(|pct| pct.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
        .ok_or_else(|| BudgieError::out_of_range("Budget percentage"))
}

fn sum_abs(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Decimal> {
    let mut stmt = conn.prepare(sql)?;
    let amounts = stmt
        .query_map(params, |row| decimal_column(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    checked_sum(amounts.iter().map(|a| a.abs())).ok_or_else(|| BudgieError::out_of_range("Spend total"))
}

pub fn spend_breakdown(
    conn: &Connection,
    owner: OwnerId,
    category_id: i64,
    (start, end): (NaiveDate, NaiveDate),
) -> Result<SpendBreakdown> {
    let mut category_set = vec![category_id];
    category_set.extend(child_ids(conn, owner, category_id)?);
    let in_set = category_set
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let params: [&dyn ToSql; 3] = [&owner, &start, &end];

    let direct_sql = format!(
        "SELECT t.amount FROM transactions t JOIN accounts a ON t.account_id = a.id \
         WHERE a.owner_id = ?1 AND t.date BETWEEN ?2 AND ?3 AND t.excluded = 0 \
         AND t.category_id IN ({in_set})"
    );
    let direct = sum_abs(conn, &direct_sql, &params)?;

    let split_parents_sql = format!(
        "{direct_sql} AND EXISTS (SELECT 1 FROM transaction_splits s WHERE s.transaction_id = t.id)"
    );
    let split_parents = sum_abs(conn, &split_parents_sql, &params)?;

    let splits_sql = format!(
        "SELECT s.amount FROM transaction_splits s \
         JOIN transactions t ON s.transaction_id = t.id \
         JOIN accounts a ON t.account_id = a.id \
         WHERE a.owner_id = ?1 AND t.date BETWEEN ?2 AND ?3 AND t.excluded = 0 \
         AND s.is_excluded = 0 AND s.category_id IN ({in_set})"
    );
    let splits = sum_abs(conn, &splits_sql, &params)?;

    Ok(SpendBreakdown {
        direct,
        split_parents,
        splits,
    })
}

/// Spend against `budget` for the period containing `reference`. Always
/// derived from the ledger; nothing is cached.
pub fn compute_spent(conn: &Connection, budget: &Budget, reference: NaiveDate) -> Result<Decimal> {
    let range = period_range(budget.period, reference);
    spend_breakdown(conn, budget.owner_id, budget.category_id, range)?.spent()
}

pub fn get_budget(conn: &Connection, owner: OwnerId, id: i64) -> Result<Budget> {
    conn.query_row(
        &format!("SELECT {BUDGET_COLUMNS} FROM budgets WHERE id = ?1 AND owner_id = ?2"),
        [id, owner],
        budget_from_row,
    )
    .optional()?
    .ok_or_else(|| BudgieError::not_found("Budget", id))
}

pub fn list_budgets(conn: &Connection, owner: OwnerId, today: NaiveDate) -> Result<Vec<BudgetProgress>> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.owner_id, b.category_id, b.amount, b.period, c.name \
         FROM budgets b JOIN categories c ON b.category_id = c.id \
         WHERE b.owner_id = ?1 \
         ORDER BY c.name, CASE b.period WHEN 'weekly' THEN 0 WHEN 'monthly' THEN 1 ELSE 2 END",
    )?;
    let rows: Vec<(Budget, String)> = stmt
        .query_map([owner], |row| Ok((budget_from_row(row)?, row.get(5)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(budget, category_name)| {
            let (start, end) = period_range(budget.period, today);
            let spent = compute_spent(conn, &budget, today)?;
            Ok(BudgetProgress {
                remaining: budget
                    .amount
                    .checked_sub(spent)
                    .ok_or_else(|| BudgieError::out_of_range("Budget remaining"))?,
                percentage: percentage(spent, budget.amount)?,
                budget,
                category_name,
                start,
                end,
                spent,
            })
        })
        .collect()
}

fn validate_amount(amount: Decimal) -> Result<()> {
    if amount < Decimal::ZERO {
        return Err(BudgieError::validation("Budget amount cannot be negative"));
    }
    Ok(())
}

/// Creates the budget, or updates the amount of the existing one for the same
/// category and period.
pub fn upsert_budget(
    conn: &Connection,
    owner: OwnerId,
    category_id: i64,
    amount: Decimal,
    period: BudgetPeriod,
) -> Result<Budget> {
    validate_amount(amount)?;
    get_category(conn, owner, category_id)?;
    conn.execute(
        "INSERT INTO budgets (owner_id, category_id, amount, period) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT (owner_id, category_id, period) DO UPDATE SET amount = excluded.amount",
        rusqlite::params![owner, category_id, amount.to_string(), period.as_str()],
    )?;
    let budget = conn.query_row(
        &format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets \
             WHERE owner_id = ?1 AND category_id = ?2 AND period = ?3"
        ),
        rusqlite::params![owner, category_id, period.as_str()],
        budget_from_row,
    )?;
    info!(owner, id = budget.id, category_id, %amount, %period, "saved budget");
    Ok(budget)
}

pub fn update_budget(conn: &Connection, owner: OwnerId, id: i64, patch: BudgetPatch) -> Result<Budget> {
    let mut budget = get_budget(conn, owner, id)?;
    if let Some(category_id) = patch.category_id {
        get_category(conn, owner, category_id)?;
        budget.category_id = category_id;
    }
    if let Some(amount) = patch.amount {
        validate_amount(amount)?;
        budget.amount = amount;
    }
    if let Some(period) = patch.period {
        budget.period = period;
    }

    let clash: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM budgets \
         WHERE owner_id = ?1 AND category_id = ?2 AND period = ?3 AND id != ?4)",
        rusqlite::params![owner, budget.category_id, budget.period.as_str(), id],
        |row| row.get(0),
    )?;
    if clash {
        return Err(BudgieError::validation(format!(
            "A {} budget for this category already exists",
            budget.period
        )));
    }

    conn.execute(
        "UPDATE budgets SET category_id = ?1, amount = ?2, period = ?3 WHERE id = ?4 AND owner_id = ?5",
        rusqlite::params![
            budget.category_id,
            budget.amount.to_string(),
            budget.period.as_str(),
            id,
            owner
        ],
    )?;
    info!(owner, id, "updated budget");
    Ok(budget)
}

pub fn delete_budget(conn: &Connection, owner: OwnerId, id: i64) -> Result<()> {
    let deleted = conn.execute("DELETE FROM budgets WHERE id = ?1 AND owner_id = ?2", [id, owner])?;
    if deleted == 0 {
        return Err(BudgieError::not_found("Budget", id));
    }
    info!(owner, id, "deleted budget");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{add_account, add_txn, category_id, test_db};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn add_split(conn: &Connection, txn: i64, category_id: Option<i64>, amount: &str, excluded: bool) {
        conn.execute(
            "INSERT INTO transaction_splits (transaction_id, category_id, amount, is_excluded) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![txn, category_id, amount, excluded],
        )
        .unwrap();
    }

    #[test]
    fn test_monthly_range() {
        assert_eq!(
            period_range(BudgetPeriod::Monthly, date("2026-02-10")),
            (date("2026-02-01"), date("2026-02-28"))
        );
        assert_eq!(
            period_range(BudgetPeriod::Monthly, date("2028-02-29")),
            (date("2028-02-01"), date("2028-02-29"))
        );
        assert_eq!(
            period_range(BudgetPeriod::Monthly, date("2026-12-31")),
            (date("2026-12-01"), date("2026-12-31"))
        );
    }

    #[test]
    fn test_yearly_range() {
        assert_eq!(
            period_range(BudgetPeriod::Yearly, date("2026-06-01")),
            (date("2026-01-01"), date("2026-12-31"))
        );
    }

    #[test]
    fn test_weekly_range_is_monday_to_sunday() {
        // 2026-02-10 is a Tuesday.
        let expected = (date("2026-02-09"), date("2026-02-15"));
        assert_eq!(period_range(BudgetPeriod::Weekly, date("2026-02-10")), expected);
        assert_eq!(period_range(BudgetPeriod::Weekly, date("2026-02-09")), expected);
        assert_eq!(period_range(BudgetPeriod::Weekly, date("2026-02-15")), expected);
        assert_eq!(
            period_range(BudgetPeriod::Weekly, date("2026-01-01")),
            (date("2025-12-29"), date("2026-01-04"))
        );
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(dec("50"), dec("200")).unwrap(), dec("25.0"));
        assert_eq!(percentage(dec("1"), dec("3")).unwrap(), dec("33.3"));
        assert_eq!(percentage(dec("0.5"), dec("1000")).unwrap(), dec("0.1"));
        assert_eq!(percentage(dec("300"), dec("200")).unwrap(), dec("150.0"));
        assert_eq!(percentage(dec("10"), Decimal::ZERO).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_percentage_out_of_range_is_rejected() {
        let err = percentage(dec("1000000"), dec("0.0000000000000000000001")).unwrap_err();
        assert!(matches!(err, BudgieError::Validation(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_spend_overflow_is_rejected() {
        let breakdown = SpendBreakdown {
            direct: Decimal::MAX,
            split_parents: Decimal::ZERO,
            splits: Decimal::MAX,
        };
        assert!(matches!(breakdown.spent(), Err(BudgieError::Validation(_))));
    }

    #[test]
    fn test_upsert_twice_keeps_one_row() {
        let (_dir, conn) = test_db();
        let groceries = category_id(&conn, 1, "Groceries");
        let first = upsert_budget(&conn, 1, groceries, dec("100"), BudgetPeriod::Monthly).unwrap();
        let second = upsert_budget(&conn, 1, groceries, dec("150"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.amount, dec("150"));
        let count: i64 = conn.query_row("SELECT count(*) FROM budgets", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);

        upsert_budget(&conn, 1, groceries, dec("1200"), BudgetPeriod::Yearly).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM budgets", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_upsert_validation() {
        let (_dir, conn) = test_db();
        let groceries = category_id(&conn, 1, "Groceries");
        assert!(matches!(
            upsert_budget(&conn, 1, groceries, dec("-1"), BudgetPeriod::Monthly).unwrap_err(),
            BudgieError::Validation(_)
        ));
        assert!(matches!(
            upsert_budget(&conn, 2, groceries, dec("10"), BudgetPeriod::Monthly).unwrap_err(),
            BudgieError::NotFound(_)
        ));
    }

    #[test]
    fn test_spent_rolls_up_children_and_skips_excluded() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking");
        let food = category_id(&conn, 1, "Food & Dining");
        let groceries = category_id(&conn, 1, "Groceries");
        let restaurants = category_id(&conn, 1, "Restaurants");
        add_txn(&conn, acct, "2026-02-03", "KROGER", "60.00", Some(groceries));
        add_txn(&conn, acct, "2026-02-04", "CHIPOTLE", "15.50", Some(restaurants));
        add_txn(&conn, acct, "2026-02-05", "FOOD TRUCK", "8.00", Some(food));
        add_txn(&conn, acct, "2026-03-01", "KROGER", "99.00", Some(groceries));
        let refund = add_txn(&conn, acct, "2026-02-06", "KROGER REFUND", "-10.00", Some(groceries));
        let excluded = add_txn(&conn, acct, "2026-02-07", "REIMBURSED", "40.00", Some(groceries));
        conn.execute("UPDATE transactions SET excluded = 1 WHERE id = ?1", [excluded])
            .unwrap();

        let budget = upsert_budget(&conn, 1, food, dec("500"), BudgetPeriod::Monthly).unwrap();
        let spent = compute_spent(&conn, &budget, date("2026-02-10")).unwrap();
        // Refunds count by absolute value.
        assert_eq!(spent, dec("93.50"));
        assert!(refund > 0);

        let child_budget = upsert_budget(&conn, 1, groceries, dec("200"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(compute_spent(&conn, &child_budget, date("2026-02-10")).unwrap(), dec("70.00"));
    }

    #[test]
    fn test_split_spend_counts_only_matching_lines() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking");
        let groceries = category_id(&conn, 1, "Groceries");
        let shopping = category_id(&conn, 1, "Shopping");
        let txn = add_txn(&conn, acct, "2026-02-03", "TARGET", "50.00", None);
        add_split(&conn, txn, Some(groceries), "30.00", false);
        add_split(&conn, txn, Some(shopping), "20.00", false);
        add_txn(&conn, acct, "2026-02-04", "KROGER", "25.00", Some(groceries));

        let budget = upsert_budget(&conn, 1, groceries, dec("300"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(compute_spent(&conn, &budget, date("2026-02-10")).unwrap(), dec("55.00"));

        let shopping_budget = upsert_budget(&conn, 1, shopping, dec("300"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(
            compute_spent(&conn, &shopping_budget, date("2026-02-10")).unwrap(),
            dec("20.00")
        );
    }

    #[test]
    fn test_excluded_split_lines_do_not_count() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking");
        let groceries = category_id(&conn, 1, "Groceries");
        let txn = add_txn(&conn, acct, "2026-02-03", "COSTCO", "80.00", None);
        add_split(&conn, txn, Some(groceries), "50.00", false);
        add_split(&conn, txn, Some(groceries), "30.00", true);

        let budget = upsert_budget(&conn, 1, groceries, dec("300"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(compute_spent(&conn, &budget, date("2026-02-10")).unwrap(), dec("50.00"));
    }

    #[test]
    fn test_split_parent_with_stale_category_is_not_double_counted() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking");
        let groceries = category_id(&conn, 1, "Groceries");
        let shopping = category_id(&conn, 1, "Shopping");
        // Parent still carries a category alongside its splits.
        let txn = add_txn(&conn, acct, "2026-02-03", "TARGET", "50.00", Some(groceries));
        add_split(&conn, txn, Some(groceries), "30.00", false);
        add_split(&conn, txn, Some(shopping), "20.00", false);

        let breakdown = spend_breakdown(
            &conn,
            1,
            groceries,
            (date("2026-02-01"), date("2026-02-28")),
        )
        .unwrap();
        assert_eq!(breakdown.direct, dec("50.00"));
        assert_eq!(breakdown.split_parents, dec("50.00"));
        assert_eq!(breakdown.splits, dec("30.00"));
        assert_eq!(breakdown.spent().unwrap(), dec("30.00"));
    }

    #[test]
    fn test_spend_is_owner_scoped() {
        let (_dir, conn) = test_db();
        let theirs = add_account(&conn, 2, "Theirs");
        let groceries = category_id(&conn, 1, "Groceries");
        add_txn(&conn, theirs, "2026-02-03", "KROGER", "60.00", Some(groceries));
        let budget = upsert_budget(&conn, 1, groceries, dec("100"), BudgetPeriod::Monthly).unwrap();
        assert_eq!(compute_spent(&conn, &budget, date("2026-02-10")).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_list_budgets_reports_progress() {
        let (_dir, conn) = test_db();
        let acct = add_account(&conn, 1, "Checking");
        let groceries = category_id(&conn, 1, "Groceries");
        add_txn(&conn, acct, "2026-02-03", "KROGER", "250.00", Some(groceries));
        upsert_budget(&conn, 1, groceries, dec("200"), BudgetPeriod::Monthly).unwrap();

        let progress = list_budgets(&conn, 1, date("2026-02-10")).unwrap();
        assert_eq!(progress.len(), 1);
        let p = &progress[0];
        assert_eq!(p.category_name, "Groceries");
        assert_eq!((p.start, p.end), (date("2026-02-01"), date("2026-02-28")));
        assert_eq!(p.spent, dec("250.00"));
        assert_eq!(p.remaining, dec("-50.00"));
        assert_eq!(p.percentage, dec("125.0"));
    }

    #[test]
    fn test_update_budget_partial_and_conflict() {
        let (_dir, conn) = test_db();
        let groceries = category_id(&conn, 1, "Groceries");
        let weekly = upsert_budget(&conn, 1, groceries, dec("50"), BudgetPeriod::Weekly).unwrap();
        upsert_budget(&conn, 1, groceries, dec("200"), BudgetPeriod::Monthly).unwrap();

        let updated = update_budget(
            &conn,
            1,
            weekly.id,
            BudgetPatch {
                amount: Some(dec("60")),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.amount, dec("60"));
        assert_eq!(updated.period, BudgetPeriod::Weekly);

        let err = update_budget(
            &conn,
            1,
            weekly.id,
            BudgetPatch {
                period: Some(BudgetPeriod::Monthly),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(get_budget(&conn, 1, weekly.id).unwrap().period, BudgetPeriod::Weekly);
    }

    #[test]
    fn test_delete_budget() {
        let (_dir, conn) = test_db();
        let groceries = category_id(&conn, 1, "Groceries");
        let budget = upsert_budget(&conn, 1, groceries, dec("50"), BudgetPeriod::Weekly).unwrap();
        assert!(matches!(
            delete_budget(&conn, 2, budget.id).unwrap_err(),
            BudgieError::NotFound(_)
        ));
        delete_budget(&conn, 1, budget.id).unwrap();
        assert!(get_budget(&conn, 1, budget.id).is_err());
    }
}
