use crate::id::LedgerId;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or out-of-range input, detected before any mutation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown asset, investment, order or dividend
    #[error("not found: {0}")]
    NotFound(String),

    /// The compliance gate rejected the holder
    #[error("holder not eligible to transact: {0}")]
    Ineligible(String),

    /// A supply reservation could not be backed by available units
    #[error("insufficient supply for asset {asset_id}: requested {requested}, available {available}")]
    InsufficientSupply {
        asset_id: LedgerId,
        requested: u64,
        available: u64,
    },

    /// The dividend was already fanned out; re-invocation is a no-op
    #[error("dividend {0} has already been distributed")]
    AlreadyDistributed(LedgerId),

    /// No authenticated holder attached to the request
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but lacking the required role
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Errors from the underlying SQLite store
    #[error("database error: {0}")]
    Database(String),

    /// Errors converting between column values and ledger types
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row not found".to_string()),
            _ => LedgerError::Database(err.to_string()),
        }
    }
}

impl From<rust_decimal::Error> for LedgerError {
    fn from(err: rust_decimal::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}
