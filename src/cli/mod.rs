pub mod accounts;
pub mod budgets;
pub mod categories;
pub mod categorize;
pub mod import;
pub mod init;
pub mod rules;
pub mod splits;
pub mod transactions;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::{get_connection, init_db};
use crate::error::{BudgieError, Result};
use crate::models::{BudgetPeriod, MatchType, OwnerId};
use crate::settings::db_path;

/// Opens the database of the configured data directory.
pub(crate) fn open_db() -> Result<Connection> {
    let path = db_path();
    if !path.exists() {
        return Err(BudgieError::Settings(format!(
            "no database at {}; run `budgie init` first",
            path.display()
        )));
    }
    let conn = get_connection(&path)?;
    init_db(&conn)?;
    Ok(conn)
}

#[derive(Parser)]
#[command(name = "budgie", about = "Household budgeting: categories, rules, splits and budgets.")]
pub struct Cli {
    /// Household to act on (default: owner_id from settings)
    #[arg(long, global = true)]
    pub owner: Option<OwnerId>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the data directory and database, and seed default categories.
    Init {
        /// Path for budgie data (default: ~/Documents/budgie)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Re-run categorization rules on uncategorized transactions.
    Categorize,
    /// Manage transactions.
    Txn {
        #[command(subcommand)]
        command: TxnCommands,
    },
    /// Split a transaction across categories.
    Splits {
        #[command(subcommand)]
        command: SplitsCommands,
    },
    /// Manage budgets.
    Budgets {
        #[command(subcommand)]
        command: BudgetsCommands,
    },
    /// Import a CSV export or a JSON sync batch into an account.
    Import {
        /// Path to the CSV or JSON file
        file: String,
        /// Account name to import into
        #[arg(long)]
        account: String,
        /// csv or json (default: from the file extension)
        #[arg(long)]
        format: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Joint Checking'
        name: String,
        /// Account type: checking, savings, credit_card, ...
        #[arg(long = "type", default_value = "checking")]
        account_type: String,
        /// Institution name
        #[arg(long)]
        institution: Option<String>,
    },
    /// List all accounts.
    List,
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// List categories as a tree.
    List,
    /// Add a category.
    Add {
        name: String,
        /// Hex color, #RRGGBB
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        /// Parent category ID
        #[arg(long)]
        parent: Option<i64>,
        /// Mark as an income category
        #[arg(long)]
        income: bool,
    },
    /// Update a category; only the given fields change.
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, conflicts_with = "clear_icon")]
        icon: Option<String>,
        #[arg(long = "clear-icon")]
        clear_icon: bool,
        /// New parent category ID
        #[arg(long, conflicts_with = "top_level")]
        parent: Option<i64>,
        /// Make the category top-level
        #[arg(long = "top-level")]
        top_level: bool,
        #[arg(long)]
        income: Option<bool>,
    },
    /// Delete a category; its transactions move to "Other".
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Keywords; alternatives may also be joined with '|'
        #[arg(required = true)]
        keywords: Vec<String>,
        /// Category ID to assign
        #[arg(long)]
        category: i64,
        /// Match type: contains, exact, starts_with
        #[arg(long = "match-type", default_value = "contains")]
        match_type: MatchType,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Also re-categorize existing matching transactions
        #[arg(long)]
        apply: bool,
    },
    /// List rules in match order.
    List,
    /// Update a rule; only the given fields change.
    Update {
        id: i64,
        /// Replacement keywords (repeatable)
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long = "match-type")]
        match_type: Option<MatchType>,
        #[arg(long)]
        priority: Option<i64>,
        /// Also re-categorize existing matching transactions
        #[arg(long)]
        apply: bool,
    },
    /// Delete a rule.
    Delete { id: i64 },
    /// Re-categorize existing transactions matching any keyword.
    Apply {
        #[arg(required = true)]
        keywords: Vec<String>,
        #[arg(long)]
        category: i64,
        #[arg(long = "match-type", default_value = "contains")]
        match_type: MatchType,
    },
}

#[derive(Subcommand)]
pub enum TxnCommands {
    /// Record a transaction by hand. Positive amounts are spending.
    Add {
        /// Account name
        #[arg(long)]
        account: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        name: String,
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        merchant: Option<String>,
        /// Category ID (default: picked by the rules)
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        pending: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Set or clear the category of a transaction, discarding any splits.
    Categorize {
        id: i64,
        #[arg(long, required_unless_present = "clear", conflicts_with = "clear")]
        category: Option<i64>,
        #[arg(long)]
        clear: bool,
    },
    /// Leave a transaction out of budgets.
    Exclude { id: i64 },
    /// Count a previously excluded transaction again.
    Include { id: i64 },
    /// List transactions, newest first.
    List {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        uncategorized: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one transaction with its splits.
    Show { id: i64 },
}

#[derive(Subcommand)]
pub enum SplitsCommands {
    /// Show the splits of a transaction.
    Show { transaction: i64 },
    /// Replace the splits of a transaction.
    Set {
        transaction: i64,
        /// CATEGORY_ID:AMOUNT, excluded:AMOUNT or none:AMOUNT (repeatable)
        #[arg(long = "line", required = true, allow_hyphen_values = true)]
        lines: Vec<String>,
    },
    /// Remove all splits; the transaction is left uncategorized.
    Clear { transaction: i64 },
}

#[derive(Subcommand)]
pub enum BudgetsCommands {
    /// Show budget progress for the current periods.
    List {
        /// Reference date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Create a budget, or change the amount of an existing one.
    Set {
        #[arg(long)]
        category: i64,
        #[arg(long)]
        amount: Decimal,
        /// weekly, monthly or yearly
        #[arg(long, default_value = "monthly")]
        period: BudgetPeriod,
    },
    /// Update a budget; only the given fields change.
    Update {
        id: i64,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        period: Option<BudgetPeriod>,
    },
    /// Delete a budget.
    Delete { id: i64 },
}
