use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::categories::get_category;
use crate::error::{BudgieError, Result};
use crate::models::{CategoryRule, MatchType, OwnerId};

/// Learned keywords shorter than this would match far too much.
pub const MIN_LEARNED_KEYWORD_LEN: usize = 3;

const RULE_COLUMNS: &str = "id, owner_id, category_id, keyword, match_type, priority, auto_learned";

#[derive(Debug, Clone)]
pub struct NewRule {
    pub category_id: i64,
    pub keywords: Vec<String>,
    pub match_type: MatchType,
    pub priority: i64,
    pub apply_to_existing: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    pub category_id: Option<i64>,
    pub keywords: Option<Vec<String>>,
    pub match_type: Option<MatchType>,
    pub priority: Option<i64>,
    pub apply_to_existing: bool,
}

#[derive(Debug, Clone)]
pub struct SavedRule {
    pub rule: CategoryRule,
    /// Rows re-categorized when the caller asked to apply the rule.
    pub applied: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    Skipped,
    Created(i64),
    Updated(i64),
    Unchanged(i64),
}

pub struct CategorizeResult {
    pub categorized: usize,
    pub still_uncategorized: usize,
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<CategoryRule> {
    let match_type: String = row.get(4)?;
    let match_type = match_type
        .parse::<MatchType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(CategoryRule {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        category_id: row.get(2)?,
        keyword: row.get(3)?,
        match_type,
        priority: row.get(5)?,
        auto_learned: row.get(6)?,
    })
}

pub fn normalize_keyword(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Upper-cases, trims, and de-duplicates keyword alternatives. A `|` inside an
/// entry splits it into further alternatives.
pub fn normalize_keywords(raw: &[String]) -> Result<Vec<String>> {
    let mut keywords: Vec<String> = Vec::new();
    for entry in raw {
        for part in entry.split('|') {
            let keyword = normalize_keyword(part);
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }
    if keywords.is_empty() {
        return Err(BudgieError::validation("At least one keyword is required"));
    }
    Ok(keywords)
}

/// Rules in evaluation order: priority descending. The secondary keys only make
/// the order reproducible; same-priority rules have no defined precedence.
pub fn list_rules(conn: &Connection, owner: OwnerId) -> Result<Vec<CategoryRule>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RULE_COLUMNS} FROM category_rules WHERE owner_id = ?1 \
         ORDER BY priority DESC, match_type ASC, id ASC"
    ))?;
    let rules = stmt
        .query_map([owner], rule_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn get_rule(conn: &Connection, owner: OwnerId, id: i64) -> Result<CategoryRule> {
    conn.query_row(
        &format!("SELECT {RULE_COLUMNS} FROM category_rules WHERE id = ?1 AND owner_id = ?2"),
        [id, owner],
        rule_from_row,
    )
    .optional()?
    .ok_or_else(|| BudgieError::not_found("Rule", id))
}

fn rule_matches(rule: &CategoryRule, name: &str, merchant: Option<&str>) -> bool {
    rule.keywords().any(|keyword| {
        rule.match_type.matches(name, keyword)
            || merchant.is_some_and(|m| rule.match_type.matches(m, keyword))
    })
}

/// Picks the matching rule with the strictly highest priority. Name and
/// merchant are tested independently; either one matching is enough.
pub fn best_match<'a>(
    rules: &'a [CategoryRule],
    name: &str,
    merchant: Option<&str>,
) -> Option<&'a CategoryRule> {
    let name = name.to_uppercase();
    let merchant = merchant.map(str::to_uppercase);
    let mut best: Option<&CategoryRule> = None;
    for rule in rules {
        if !rule_matches(rule, &name, merchant.as_deref()) {
            continue;
        }
        if best.map_or(true, |b| rule.priority > b.priority) {
            best = Some(rule);
        }
    }
    best
}

pub fn match_category(
    conn: &Connection,
    owner: OwnerId,
    name: &str,
    merchant: Option<&str>,
) -> Result<Option<i64>> {
    let rules = list_rules(conn, owner)?;
    let matched = best_match(&rules, name, merchant);
    debug!(
        owner,
        name,
        rule = matched.map(|r| r.id),
        "rule match"
    );
    Ok(matched.map(|r| r.category_id))
}

/// Remembers a manual categorization as a `contains` rule keyed on the
/// merchant (or the name when there is no merchant).
pub fn learn_from_categorization(
    conn: &Connection,
    owner: OwnerId,
    name: &str,
    merchant: Option<&str>,
    category_id: i64,
) -> Result<LearnOutcome> {
    let source = merchant
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(name);
    let keyword = normalize_keyword(source);
    if keyword.chars().count() < MIN_LEARNED_KEYWORD_LEN {
        debug!(owner, keyword = %keyword, "keyword too short to learn");
        return Ok(LearnOutcome::Skipped);
    }

    let existing: Option<(i64, i64)> = conn
        .query_row(
            "SELECT id, category_id FROM category_rules WHERE owner_id = ?1 AND keyword = ?2 \
             ORDER BY id LIMIT 1",
            rusqlite::params![owner, keyword],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let outcome = match existing {
        Some((id, current)) if current == category_id => LearnOutcome::Unchanged(id),
        Some((id, _)) => {
            conn.execute(
                "UPDATE category_rules SET category_id = ?1 WHERE id = ?2",
                [category_id, id],
            )?;
            LearnOutcome::Updated(id)
        }
        None => {
            conn.execute(
                "INSERT INTO category_rules (owner_id, category_id, keyword, match_type, priority, auto_learned) \
                 VALUES (?1, ?2, ?3, 'contains', 0, 1)",
                rusqlite::params![owner, category_id, keyword],
            )?;
            LearnOutcome::Created(conn.last_insert_rowid())
        }
    };
    info!(owner, keyword = %keyword, category_id, ?outcome, "learned rule");
    Ok(outcome)
}

fn match_condition(match_type: MatchType, column: &str, param: usize) -> String {
    match match_type {
        MatchType::Contains => format!("instr(unicode_upper({column}), ?{param}) > 0"),
        MatchType::Exact => format!("unicode_upper({column}) = ?{param}"),
        MatchType::StartsWith => {
            format!("substr(unicode_upper({column}), 1, length(?{param})) = ?{param}")
        }
    }
}

/// Re-categorizes every owned transaction whose name or merchant matches any
/// of `keywords`, in a single statement. Split transactions are left alone.
/// Returns the number of rows changed.
pub fn apply_rule_to_existing(
    conn: &Connection,
    owner: OwnerId,
    keywords: &[String],
    match_type: MatchType,
    category_id: i64,
) -> Result<usize> {
    let keywords = normalize_keywords(keywords)?;
    get_category(conn, owner, category_id)?;

    // ?1 = category, ?2 = owner, keywords from ?3 on.
    let conditions: Vec<String> = (0..keywords.len())
        .map(|i| {
            let param = i + 3;
            format!(
                "{} OR {}",
                match_condition(match_type, "name", param),
                match_condition(match_type, "merchant_name", param)
            )
        })
        .collect();
    let sql = format!(
        "UPDATE transactions SET category_id = ?1, updated_at = datetime('now') \
         WHERE account_id IN (SELECT id FROM accounts WHERE owner_id = ?2) \
         AND NOT EXISTS (SELECT 1 FROM transaction_splits s WHERE s.transaction_id = transactions.id) \
         AND ({})",
        conditions.join(" OR ")
    );

    let mut params: Vec<&dyn ToSql> = vec![&category_id, &owner];
    params.extend(keywords.iter().map(|k| k as &dyn ToSql));
    let affected = conn.execute(&sql, params.as_slice())?;
    info!(owner, category_id, keywords = ?keywords, affected, "applied rule to existing transactions");
    Ok(affected)
}

pub fn create_rule(conn: &Connection, owner: OwnerId, new: NewRule) -> Result<SavedRule> {
    let keywords = normalize_keywords(&new.keywords)?;
    get_category(conn, owner, new.category_id)?;
    conn.execute(
        "INSERT INTO category_rules (owner_id, category_id, keyword, match_type, priority, auto_learned) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        rusqlite::params![
            owner,
            new.category_id,
            keywords.join("|"),
            new.match_type.as_str(),
            new.priority
        ],
    )?;
    let rule = get_rule(conn, owner, conn.last_insert_rowid())?;
    info!(owner, id = rule.id, keyword = %rule.keyword, "created rule");

    let applied = if new.apply_to_existing {
        Some(apply_rule_to_existing(
            conn,
            owner,
            &keywords,
            rule.match_type,
            rule.category_id,
        )?)
    } else {
        None
    };
    Ok(SavedRule { rule, applied })
}

pub fn update_rule(conn: &Connection, owner: OwnerId, id: i64, patch: RulePatch) -> Result<SavedRule> {
    let mut rule = get_rule(conn, owner, id)?;
    if let Some(category_id) = patch.category_id {
        get_category(conn, owner, category_id)?;
        rule.category_id = category_id;
    }
    if let Some(keywords) = patch.keywords {
        rule.keyword = normalize_keywords(&keywords)?.join("|");
    }
    if let Some(match_type) = patch.match_type {
        rule.match_type = match_type;
    }
    if let Some(priority) = patch.priority {
        rule.priority = priority;
    }
    conn.execute(
        "UPDATE category_rules SET category_id = ?1, keyword = ?2, match_type = ?3, priority = ?4 \
         WHERE id = ?5 AND owner_id = ?6",
        rusqlite::params![
            rule.category_id,
            rule.keyword,
            rule.match_type.as_str(),
            rule.priority,
            id,
            owner
        ],
    )?;
    info!(owner, id, "updated rule");

    let applied = if patch.apply_to_existing {
        let keywords: Vec<String> = rule.keywords().map(str::to_string).collect();
        Some(apply_rule_to_existing(
            conn,
            owner,
            &keywords,
            rule.match_type,
            rule.category_id,
        )?)
    } else {
        None
    };
    Ok(SavedRule { rule, applied })
}

pub fn delete_rule(conn: &Connection, owner: OwnerId, id: i64) -> Result<()> {
    let deleted = conn.execute(
        "DELETE FROM category_rules WHERE id = ?1 AND owner_id = ?2",
        [id, owner],
    )?;
    if deleted == 0 {
        return Err(BudgieError::not_found("Rule", id));
    }
    info!(owner, id, "deleted rule");
    Ok(())
}

/// Runs the rule set over owned transactions that have neither a category nor splits.
pub fn categorize_uncategorized(conn: &Connection, owner: OwnerId) -> Result<CategorizeResult> {
    let rules = list_rules(conn, owner)?;

    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.merchant_name FROM transactions t \
         JOIN accounts a ON t.account_id = a.id \
         WHERE a.owner_id = ?1 AND t.category_id IS NULL \
         AND NOT EXISTS (SELECT 1 FROM transaction_splits s WHERE s.transaction_id = t.id)",
    )?;
    let pending: Vec<(i64, String, Option<String>)> = stmt
        .query_map([owner], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut categorized = 0usize;
    let mut still_uncategorized = 0usize;
    for (txn_id, name, merchant) in &pending {
        match best_match(&rules, name, merchant.as_deref()) {
            Some(rule) => {
                conn.execute(
                    "UPDATE transactions SET category_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                    [rule.category_id, *txn_id],
                )?;
                categorized += 1;
            }
            None => still_uncategorized += 1,
        }
    }

    Ok(CategorizeResult {
        categorized,
        still_uncategorized,
    })
}
