mod budgets;
mod categories;
mod categorizer;
mod cli;
mod db;
mod error;
mod fmt;
mod importer;
mod ledger;
mod models;
mod settings;
mod splits;

use clap::Parser;
use tracing_subscriber::{fmt as log_fmt, EnvFilter};

use categories::{CategoryPatch, NewCategory};
use categorizer::RulePatch;
use cli::{
    AccountsCommands, BudgetsCommands, CategoriesCommands, Cli, Commands, RulesCommands, SplitsCommands,
    TxnCommands,
};
use ledger::{NewTransaction, TransactionFilter};

const LOG_ENV: &str = "BUDGIE_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("budgie=warn"));
    log_fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let settings = settings::load_settings();
    let owner = cli.owner.unwrap_or(settings.owner_id);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir, owner),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                name,
                account_type,
                institution,
            } => cli::accounts::add(owner, &name, &account_type, institution.as_deref()),
            AccountsCommands::List => cli::accounts::list(owner),
        },
        Commands::Categories { command } => match command {
            CategoriesCommands::List => cli::categories::list(owner),
            CategoriesCommands::Add {
                name,
                color,
                icon,
                parent,
                income,
            } => cli::categories::add(
                owner,
                NewCategory {
                    name,
                    color,
                    icon,
                    parent_id: parent,
                    is_income: income,
                },
            ),
            CategoriesCommands::Update {
                id,
                name,
                color,
                icon,
                clear_icon,
                parent,
                top_level,
                income,
            } => cli::categories::update(
                owner,
                id,
                CategoryPatch {
                    name,
                    color,
                    icon: if clear_icon { Some(None) } else { icon.map(Some) },
                    parent_id: if top_level { Some(None) } else { parent.map(Some) },
                    is_income: income,
                },
            ),
            CategoriesCommands::Delete { id } => cli::categories::delete(owner, id),
        },
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                keywords,
                category,
                match_type,
                priority,
                apply,
            } => cli::rules::add(owner, keywords, category, match_type, priority, apply),
            RulesCommands::List => cli::rules::list(owner),
            RulesCommands::Update {
                id,
                keywords,
                category,
                match_type,
                priority,
                apply,
            } => cli::rules::update(
                owner,
                id,
                RulePatch {
                    category_id: category,
                    keywords: (!keywords.is_empty()).then_some(keywords),
                    match_type,
                    priority,
                    apply_to_existing: apply,
                },
            ),
            RulesCommands::Delete { id } => cli::rules::delete(owner, id),
            RulesCommands::Apply {
                keywords,
                category,
                match_type,
            } => cli::rules::apply(owner, &keywords, category, match_type),
        },
        Commands::Categorize => cli::categorize::run(owner),
        Commands::Txn { command } => match command {
            TxnCommands::Add {
                account,
                date,
                name,
                amount,
                merchant,
                category,
                pending,
                notes,
            } => cli::transactions::add(
                owner,
                &account,
                NewTransaction {
                    account_id: 0,
                    date,
                    name,
                    merchant_name: merchant,
                    amount,
                    category_id: category,
                    pending,
                    notes,
                },
            ),
            TxnCommands::Categorize { id, category, clear } => cli::transactions::set_category(
                owner,
                id,
                if clear { None } else { category },
                settings.learn_rules,
            ),
            TxnCommands::Exclude { id } => cli::transactions::exclude(owner, id, true),
            TxnCommands::Include { id } => cli::transactions::exclude(owner, id, false),
            TxnCommands::List {
                from,
                to,
                category,
                uncategorized,
                limit,
            } => cli::transactions::list(
                owner,
                TransactionFilter {
                    from,
                    to,
                    category_id: category,
                    uncategorized_only: uncategorized,
                    limit,
                },
            ),
            TxnCommands::Show { id } => cli::transactions::show(owner, id),
        },
        Commands::Splits { command } => match command {
            SplitsCommands::Show { transaction } => cli::splits::show(owner, transaction),
            SplitsCommands::Set { transaction, lines } => cli::splits::set(owner, transaction, &lines),
            SplitsCommands::Clear { transaction } => cli::splits::clear(owner, transaction),
        },
        Commands::Budgets { command } => match command {
            BudgetsCommands::List { date } => cli::budgets::list(owner, date),
            BudgetsCommands::Set {
                category,
                amount,
                period,
            } => cli::budgets::set(owner, category, amount, period),
            BudgetsCommands::Update {
                id,
                category,
                amount,
                period,
            } => cli::budgets::update(
                owner,
                id,
                budgets::BudgetPatch {
                    category_id: category,
                    amount,
                    period,
                },
            ),
            BudgetsCommands::Delete { id } => cli::budgets::delete(owner, id),
        },
        Commands::Import {
            file,
            account,
            format,
        } => cli::import::run(owner, &file, &account, format.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
