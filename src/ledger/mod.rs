//! The comment ledger: an append-only record of posts and replies per wall.

mod model;
mod store;

pub use model::*;
pub use store::Ledger;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Ledger is inconsistent: {0}")]
    Corrupt(String),
}
