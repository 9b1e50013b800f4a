//! Storage interface consumed by the ledger engine.
//!
//! [`LedgerStore`] covers snapshot reads (no locking) and opens transactions;
//! [`LedgerTx`] covers the locked reads and writes a mutating operation
//! performs atomically. Two implementations ship with the crate:
//! [`postgres::PgLedgerStore`] for the relational store and
//! [`memory::MemoryLedgerStore`] for tests and embedding without a database.

pub mod memory;
pub mod postgres;

use crate::error::LedgerError;
use crate::model::{
    MovementStat, MovementType, NewMovement, NewStockRecord, StockKey, StockMovement, StockRecord,
};

/// Snapshot reads and transaction entry for one backing store.
pub trait LedgerStore {
    /// Transaction handle type.
    type Tx<'a>: LedgerTx
    where
        Self: 'a;

    /// Open a transaction for a mutating operation.
    fn begin(&self) -> Result<Self::Tx<'_>, LedgerError>;

    /// Exact-key stock lookup.
    fn get_stock(&self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError>;

    /// All warehouses holding this product, ordered by warehouse name.
    /// A `variant_id` of `None` returns rows for every variant of the product.
    fn stock_by_product(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<Vec<StockRecord>, LedgerError>;

    /// All product/variant rows in one warehouse, ordered by product name.
    fn stock_by_warehouse(&self, warehouse_id: i64) -> Result<Vec<StockRecord>, LedgerError>;

    /// Full inventory snapshot, ordered by warehouse then product name.
    fn all_stock(&self) -> Result<Vec<StockRecord>, LedgerError>;

    /// Records at or below their reorder level, most depleted first,
    /// optionally scoped to one warehouse.
    fn low_stock(&self, warehouse_id: Option<i64>) -> Result<Vec<StockRecord>, LedgerError>;

    /// Ledger entries for one stock record, newest first.
    fn movements_by_stock(&self, stock_id: i64) -> Result<Vec<StockMovement>, LedgerError>;

    /// Ledger entries of one movement type, newest first.
    fn movements_by_type(
        &self,
        movement_type: MovementType,
        limit: u64,
    ) -> Result<Vec<StockMovement>, LedgerError>;

    /// Most recent ledger entries across all stock.
    fn recent_movements(&self, limit: u64) -> Result<Vec<StockMovement>, LedgerError>;

    /// Per-type movement aggregates within the trailing `window_days`,
    /// ordered by count descending, optionally scoped to one warehouse.
    fn movement_stats(
        &self,
        warehouse_id: Option<i64>,
        window_days: u32,
    ) -> Result<Vec<MovementStat>, LedgerError>;

    fn product_exists(&self, product_id: i64) -> Result<bool, LedgerError>;

    fn variant_exists(&self, variant_id: i64) -> Result<bool, LedgerError>;

    fn warehouse_exists(&self, warehouse_id: i64) -> Result<bool, LedgerError>;
}

/// Writes (and locked reads) inside one atomic operation.
///
/// Dropping a transaction without `commit` discards its writes.
pub trait LedgerTx {
    /// Exact-key stock lookup, locking the row against concurrent writers for
    /// the rest of the transaction.
    fn get_stock_for_update(&mut self, key: &StockKey)
        -> Result<Option<StockRecord>, LedgerError>;

    /// Insert a new triple or overwrite quantities/reorder/cost for an
    /// existing one. Duplicate key is the expected "record exists" path.
    /// Returns the stock record id.
    fn upsert_stock(&mut self, record: &NewStockRecord) -> Result<i64, LedgerError>;

    /// Write both quantity fields for one record, guarded by `version`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ConcurrencyConflict` when the stored version no
    /// longer matches, i.e. a concurrent writer got there first.
    fn update_quantities(
        &mut self,
        stock_id: i64,
        version: i64,
        quantity_on_hand: i64,
        quantity_reserved: i64,
    ) -> Result<(), LedgerError>;

    /// Append one ledger entry; the id and `created_at` are server-assigned.
    /// Returns the new entry's id.
    fn append_movement(&mut self, movement: &NewMovement) -> Result<i64, LedgerError>;

    /// Commit all writes made in this transaction.
    fn commit(self) -> Result<(), LedgerError>;

    /// Discard all writes made in this transaction.
    fn rollback(self) -> Result<(), LedgerError>;
}
