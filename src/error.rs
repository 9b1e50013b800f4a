//! Error types for the stock ledger engine.
//!
//! Two layers: `StoreError` covers the storage collaborator (driver failures,
//! row decoding, connection problems), while `LedgerError` is the taxonomy the
//! engine surfaces to callers (not-found, insufficient stock, lost optimistic
//! writes, or a wrapped storage failure).

use may_postgres::Error as PostgresError;
use std::fmt;

/// Storage-layer error
#[derive(Debug)]
pub enum StoreError {
    /// `PostgreSQL` error from `may_postgres`
    Postgres(PostgresError),
    /// Row parsing/conversion error
    Parse(String),
    /// Connection establishment error
    Connection(String),
    /// Other storage errors
    Other(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Postgres(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            StoreError::Parse(s) => {
                write!(f, "Parse error: {s}")
            }
            StoreError::Connection(s) => {
                write!(f, "Connection error: {s}")
            }
            StoreError::Other(s) => {
                write!(f, "Storage error: {s}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<PostgresError> for StoreError {
    fn from(err: PostgresError) -> Self {
        StoreError::Postgres(err)
    }
}

/// Ledger engine error
///
/// Every mutating operation returns one of these. `NotFound` and
/// `InsufficientStock` are user-correctable and never retried internally;
/// `ConcurrencyConflict` is retried a bounded number of times by the engine
/// before it reaches the caller.
#[derive(Debug)]
pub enum LedgerError {
    /// Requested entity does not exist (stock record, product, variant, warehouse)
    NotFound(&'static str),
    /// Operation would drive quantity_on_hand negative
    InsufficientStock {
        /// Units currently on hand
        available: i64,
        /// Units the operation asked for
        requested: i64,
    },
    /// An optimistic write lost a race with a concurrent writer
    ConcurrencyConflict,
    /// Underlying storage failure
    Storage(StoreError),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::NotFound(entity) => {
                write!(f, "{entity} not found")
            }
            LedgerError::InsufficientStock {
                available,
                requested,
            } => {
                write!(
                    f,
                    "Insufficient stock available: requested {requested}, on hand {available}"
                )
            }
            LedgerError::ConcurrencyConflict => {
                write!(f, "Stock record was modified concurrently")
            }
            LedgerError::Storage(e) => {
                write!(f, "Storage failure: {e}")
            }
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Storage(err)
    }
}

impl From<PostgresError> for LedgerError {
    fn from(err: PostgresError) -> Self {
        LedgerError::Storage(StoreError::Postgres(err))
    }
}
