use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BudgieError;

/// Id of the user that owns a row. Supplied by the caller, never derived.
pub type OwnerId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MatchType {
    #[default]
    Contains,
    Exact,
    StartsWith,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Exact => "exact",
            Self::StartsWith => "starts_with",
        }
    }

    /// Whether `text` (already upper-cased) satisfies `keyword` under this match type.
    pub fn matches(&self, text: &str, keyword: &str) -> bool {
        match self {
            Self::Contains => text.contains(keyword),
            Self::Exact => text == keyword,
            Self::StartsWith => text.starts_with(keyword),
        }
    }
}

impl FromStr for MatchType {
    type Err = BudgieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contains" => Ok(Self::Contains),
            "exact" => Ok(Self::Exact),
            "starts_with" => Ok(Self::StartsWith),
            other => Err(BudgieError::validation(format!(
                "Invalid match type: {other} (must be contains, exact, or starts_with)"
            ))),
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
    Yearly,
}

impl BudgetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl FromStr for BudgetPeriod {
    type Err = BudgieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(BudgieError::validation(format!(
                "Invalid period: {other} (must be weekly, monthly, or yearly)"
            ))),
        }
    }
}

impl fmt::Display for BudgetPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub owner_id: OwnerId,
    pub name: String,
    pub account_type: String,
    pub institution: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub owner_id: OwnerId,
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
    pub parent_id: Option<i64>,
    pub is_income: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRule {
    pub id: i64,
    pub owner_id: OwnerId,
    pub category_id: i64,
    /// Upper-cased; alternatives are stored joined by `|`.
    pub keyword: String,
    pub match_type: MatchType,
    pub priority: i64,
    pub auto_learned: bool,
}

impl CategoryRule {
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.keyword.split('|').filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub name: String,
    pub merchant_name: Option<String>,
    /// Positive is an outflow, negative an inflow.
    pub amount: Decimal,
    pub category_id: Option<i64>,
    pub pending: bool,
    pub excluded: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSplit {
    pub id: i64,
    pub transaction_id: i64,
    pub category_id: Option<i64>,
    pub amount: Decimal,
    pub is_excluded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    pub id: i64,
    pub owner_id: OwnerId,
    pub category_id: i64,
    pub amount: Decimal,
    pub period: BudgetPeriod,
}

/// Sum of `amounts`, or `None` if it does not fit in a `Decimal`.
pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
}

/// A normalized record handed over by a ledger import source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedTransaction {
    pub external_id: String,
    pub date: NaiveDate,
    pub name: String,
    #[serde(default)]
    pub merchant_name: Option<String>,
    pub amount: Decimal,
    #[serde(default)]
    pub pending: bool,
}
