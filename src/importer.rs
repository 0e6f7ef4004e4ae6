use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::categorizer::match_category;
use crate::db::decimal_column;
use crate::error::{BudgieError, Result};
use crate::ledger::get_account;
use crate::models::{ImportedTransaction, OwnerId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parses a bank-export amount: `$1,234.56`, `"500.00"`, `(42.00)`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let s = raw.replace([',', '"', '$'], "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<Decimal>().ok().map(|d| -d);
    }
    s.parse().ok()
}

pub fn parse_date_mdy(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.trim().split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// `YYYY-MM-DD` or `MM/DD/YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .or_else(|| parse_date_mdy(raw))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// Stable id for a record whose export carries none. `occurrence` tells apart
/// identical rows on the same day.
pub fn fingerprint(account_id: i64, date: NaiveDate, amount: Decimal, name: &str, occurrence: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{account_id}|{date}|{}|{name}|{occurrence}", amount.normalize()));
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One pull from a ledger source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub added: Vec<ImportedTransaction>,
    #[serde(default)]
    pub modified: Vec<ImportedTransaction>,
    /// External ids of records that no longer exist upstream.
    #[serde(default)]
    pub removed: Vec<String>,
}

pub trait LedgerSource {
    fn name(&self) -> &str;
    fn fetch(&mut self) -> Result<SyncBatch>;
}

/// A bank export with a header row naming `date`, `name`, `amount` and
/// optionally `merchant`, `id` and `pending`. Every row is reported as added.
pub struct CsvSource {
    path: PathBuf,
    account_id: i64,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, account_id: i64) -> Self {
        Self {
            path: path.into(),
            account_id,
        }
    }
}

impl LedgerSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&mut self) -> Result<SyncBatch> {
        let file = std::fs::File::open(&self.path)?;
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(std::io::BufReader::new(file));

        let headers: HashMap<String, usize> = rdr
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| (h.to_ascii_lowercase(), i))
            .collect();
        let column = |name: &str| headers.get(name).copied();
        let (Some(idx_date), Some(idx_name), Some(idx_amount)) =
            (column("date"), column("name"), column("amount"))
        else {
            return Err(BudgieError::validation(
                "CSV needs date, name and amount columns",
            ));
        };
        let idx_merchant = column("merchant");
        let idx_id = column("id");
        let idx_pending = column("pending");

        let mut seen: HashMap<(NaiveDate, Decimal, String), usize> = HashMap::new();
        let mut batch = SyncBatch::default();
        for (line, result) in rdr.records().enumerate() {
            let record = result?;
            let field = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let (Some(date), Some(amount)) = (
                record.get(idx_date).and_then(parse_date),
                record.get(idx_amount).and_then(parse_amount),
            ) else {
                warn!(line = line + 2, "skipping row with unreadable date or amount");
                continue;
            };
            let Some(name) = field(Some(idx_name)) else {
                warn!(line = line + 2, "skipping row without a name");
                continue;
            };

            let external_id = match field(idx_id) {
                Some(id) => id,
                None => {
                    let occurrence = seen.entry((date, amount, name.clone())).or_insert(0);
                    let id = fingerprint(self.account_id, date, amount, &name, *occurrence);
                    *occurrence += 1;
                    id
                }
            };
            batch.added.push(ImportedTransaction {
                external_id,
                date,
                name,
                merchant_name: field(idx_merchant),
                amount,
                pending: field(idx_pending).is_some_and(|p| parse_flag(&p)),
            });
        }
        Ok(batch)
    }
}

/// A serialized [`SyncBatch`].
pub struct JsonSource {
    path: PathBuf,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LedgerSource for JsonSource {
    fn name(&self) -> &str {
        "json"
    }

    fn fetch(&mut self) -> Result<SyncBatch> {
        let file = std::fs::File::open(&self.path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

/// Picks a source by format key, falling back to the file extension.
pub fn source_for_file(
    path: &Path,
    account_id: i64,
    format: Option<&str>,
) -> Result<Box<dyn LedgerSource>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let format = format.map(str::to_ascii_lowercase).or(ext);
    match format.as_deref() {
        Some("csv") => Ok(Box::new(CsvSource::new(path, account_id))),
        Some("json") => Ok(Box::new(JsonSource::new(path))),
        Some(other) => Err(BudgieError::validation(format!("Unknown import format: {other}"))),
        None => Err(BudgieError::validation(
            "Cannot tell the import format; pass --format csv or --format json",
        )),
    }
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// New records the rule engine assigned a category to.
    pub categorized: usize,
}

fn find_by_external_id(conn: &Connection, account_id: i64, external_id: &str) -> Result<Option<(i64, Decimal)>> {
    Ok(conn
        .query_row(
            "SELECT id, amount FROM transactions WHERE account_id = ?1 AND external_id = ?2",
            rusqlite::params![account_id, external_id],
            |row| Ok((row.get(0)?, decimal_column(row, 1)?)),
        )
        .optional()?)
}

/// Refreshes the raw fields of a known record, keeping its category. A changed
/// amount invalidates any split set.
fn refresh(conn: &Connection, id: i64, old_amount: Decimal, record: &ImportedTransaction) -> Result<()> {
    conn.execute(
        "UPDATE transactions SET date = ?1, name = ?2, merchant_name = ?3, amount = ?4, pending = ?5, \
         updated_at = datetime('now') WHERE id = ?6",
        rusqlite::params![
            record.date,
            record.name,
            record.merchant_name,
            record.amount.to_string(),
            record.pending,
            id
        ],
    )?;
    if old_amount != record.amount {
        let dropped = conn.execute("DELETE FROM transaction_splits WHERE transaction_id = ?1", [id])?;
        if dropped > 0 {
            debug!(id, dropped, "amount changed; dropped splits");
        }
    }
    Ok(())
}

/// Inserts a new record, or refreshes it when already present. Returns whether
/// it was new and, if so, the category the rules gave it.
fn upsert(
    conn: &Connection,
    owner: OwnerId,
    account_id: i64,
    record: &ImportedTransaction,
) -> Result<(bool, Option<i64>)> {
    if let Some((id, old_amount)) = find_by_external_id(conn, account_id, &record.external_id)? {
        refresh(conn, id, old_amount, record)?;
        return Ok((false, None));
    }
    let category_id = match_category(conn, owner, &record.name, record.merchant_name.as_deref())?;
    conn.execute(
        "INSERT INTO transactions (account_id, external_id, date, name, merchant_name, amount, category_id, pending) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            account_id,
            record.external_id,
            record.date,
            record.name,
            record.merchant_name,
            record.amount.to_string(),
            category_id,
            record.pending
        ],
    )?;
    Ok((true, category_id))
}

/// Pulls one batch from `source` into `account_id`. Records are applied one at
/// a time, so a failure partway leaves the earlier ones in place; re-running
/// the same batch is harmless.
pub fn sync(
    conn: &Connection,
    owner: OwnerId,
    account_id: i64,
    source: &mut dyn LedgerSource,
) -> Result<SyncResult> {
    get_account(conn, owner, account_id)?;
    let source_name = source.name().to_string();
    let batch = source
        .fetch()
        .map_err(|e| BudgieError::Upstream(format!("{source_name}: {e}")))?;

    let mut result = SyncResult::default();
    for record in batch.added.iter().chain(batch.modified.iter()) {
        match upsert(conn, owner, account_id, record)? {
            (true, category_id) => {
                result.added += 1;
                if category_id.is_some() {
                    result.categorized += 1;
                }
            }
            (false, _) => result.updated += 1,
        }
    }
    for external_id in &batch.removed {
        result.removed += conn.execute(
            "DELETE FROM transactions WHERE account_id = ?1 AND external_id = ?2",
            rusqlite::params![account_id, external_id],
        )?;
    }

    info!(
        owner,
        account_id,
        source = %source_name,
        added = result.added,
        updated = result.updated,
        removed = result.removed,
        categorized = result.categorized,
        "synced ledger"
    );
    Ok(result)
}
