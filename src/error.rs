use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgieError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Import source failed: {0}")]
    Upstream(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl BudgieError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: i64) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }

    pub fn out_of_range(what: &str) -> Self {
        Self::Validation(format!("{what} is out of range"))
    }
}

pub type Result<T> = std::result::Result<T, BudgieError>;
