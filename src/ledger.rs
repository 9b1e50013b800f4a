//! Reconciliation engine over a [`LedgerStore`].
//!
//! `StockLedger` owns the operation semantics: reserve/release/adjust/
//! transfer each run read-compute-write inside one storage transaction, append
//! their movement entries in the same transaction, and retry the whole
//! operation a bounded number of times when a concurrent writer invalidates
//! the record version. Reporting calls are plain snapshot reads passed
//! through to the store.

use crate::error::LedgerError;
use crate::model::{
    MovementStat, MovementType, NewMovement, NewStockRecord, StockKey, StockMovement, StockRecord,
};
use crate::store::{LedgerStore, LedgerTx};

/// Retries after the initial attempt when a version conflict is detected.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;

/// Result of a single-record mutating operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub stock_id: i64,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub movement_id: i64,
}

/// Result of a warehouse transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub source_stock_id: i64,
    pub source_on_hand: i64,
    pub destination_stock_id: i64,
    pub destination_on_hand: i64,
    pub out_movement_id: i64,
    pub in_movement_id: i64,
}

/// Inventory reconciliation engine.
///
/// # Examples
///
/// ```
/// use stockroom::ledger::StockLedger;
/// use stockroom::model::{NewStockRecord, StockKey};
/// use stockroom::store::memory::MemoryLedgerStore;
/// use rust_decimal::Decimal;
///
/// let store = MemoryLedgerStore::new();
/// store.register_product(1, "Widget", "WID-001");
/// store.register_warehouse(1, "Central");
///
/// let ledger = StockLedger::new(store);
/// ledger
///     .set_stock(&NewStockRecord {
///         product_id: 1,
///         variant_id: None,
///         warehouse_id: 1,
///         quantity_on_hand: 100,
///         quantity_reserved: 0,
///         min_reorder_level: 10,
///         last_cost: Decimal::new(995, 2),
///     })
///     .unwrap();
///
/// let key = StockKey::new(1, None, 1);
/// let change = ledger.reserve(&key, 3, "order-1001", Some("picker")).unwrap();
/// assert_eq!(change.quantity_on_hand, 97);
/// assert_eq!(change.quantity_reserved, 3);
/// ```
pub struct StockLedger<S: LedgerStore> {
    store: S,
    conflict_retries: u32,
}

impl<S: LedgerStore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }

    /// Override the bounded retry count (see `DatabaseConfig::conflict_retries`).
    pub fn with_conflict_retries(store: S, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run one mutating operation: a transaction per attempt, commit on
    /// success, rollback on error, bounded retry on version conflicts.
    fn mutate<T, F>(&self, op: &str, mut body: F) -> Result<T, LedgerError>
    where
        F: for<'t> FnMut(&mut S::Tx<'t>) -> Result<T, LedgerError>,
    {
        let mut attempts = 0;
        loop {
            let mut tx = self.store.begin()?;
            let result = match body(&mut tx) {
                Ok(value) => tx.commit().map(|()| value),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback() {
                        log::warn!("{op}: rollback failed: {rollback_err}");
                    }
                    Err(err)
                }
            };
            match result {
                Err(LedgerError::ConcurrencyConflict) if attempts < self.conflict_retries => {
                    attempts += 1;
                    log::debug!(
                        "{op}: stock record changed concurrently, retrying ({attempts}/{})",
                        self.conflict_retries
                    );
                }
                other => return other,
            }
        }
    }

    fn check_key_exists(&self, key: &StockKey) -> Result<(), LedgerError> {
        if !self.store.product_exists(key.product_id)? {
            return Err(LedgerError::NotFound("product"));
        }
        if let Some(variant_id) = key.variant_id {
            if !self.store.variant_exists(variant_id)? {
                return Err(LedgerError::NotFound("variant"));
            }
        }
        if !self.store.warehouse_exists(key.warehouse_id)? {
            return Err(LedgerError::NotFound("warehouse"));
        }
        Ok(())
    }

    /// Insert or overwrite a stock record by key. Returns the record id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the referenced product, variant, or warehouse does not
    /// exist.
    pub fn set_stock(&self, record: &NewStockRecord) -> Result<i64, LedgerError> {
        self.check_key_exists(&record.key())?;
        self.mutate("set_stock", |tx| tx.upsert_stock(record))
    }

    /// Reserve `qty` units: deducted from on-hand and added to reserved, with
    /// one `Sale` ledger entry.
    ///
    /// # Errors
    ///
    /// `InsufficientStock` when fewer than `qty` units are on hand;
    /// `NotFound` when the record (or a referenced entity) does not exist.
    pub fn reserve(
        &self,
        key: &StockKey,
        qty: i64,
        reference: &str,
        actor: Option<&str>,
    ) -> Result<StockChange, LedgerError> {
        self.check_key_exists(key)?;
        self.mutate("reserve", |tx| {
            let stock = tx
                .get_stock_for_update(key)?
                .ok_or(LedgerError::NotFound("stock record"))?;
            let new_on_hand = stock.quantity_on_hand - qty;
            if new_on_hand < 0 {
                return Err(LedgerError::InsufficientStock {
                    available: stock.quantity_on_hand,
                    requested: qty,
                });
            }
            let new_reserved = stock.quantity_reserved + qty;
            tx.update_quantities(stock.id, stock.version, new_on_hand, new_reserved)?;
            let movement_id = tx.append_movement(&NewMovement {
                stock_id: stock.id,
                change_qty: -qty,
                movement_type: MovementType::Sale,
                reference: Some(reference.to_string()),
                created_by: actor.map(str::to_string),
                note: Some(format!("Stock reserved for {reference}")),
            })?;
            Ok(StockChange {
                stock_id: stock.id,
                quantity_on_hand: new_on_hand,
                quantity_reserved: new_reserved,
                movement_id,
            })
        })
    }

    /// Release `qty` previously reserved units back to on-hand, with one
    /// `Return` ledger entry. Reserved is clamped at zero, so releasing more
    /// than was reserved never fails.
    pub fn release(
        &self,
        key: &StockKey,
        qty: i64,
        reference: &str,
        actor: Option<&str>,
    ) -> Result<StockChange, LedgerError> {
        self.check_key_exists(key)?;
        self.mutate("release", |tx| {
            let stock = tx
                .get_stock_for_update(key)?
                .ok_or(LedgerError::NotFound("stock record"))?;
            let new_on_hand = stock.quantity_on_hand + qty;
            let new_reserved = (stock.quantity_reserved - qty).max(0);
            tx.update_quantities(stock.id, stock.version, new_on_hand, new_reserved)?;
            let movement_id = tx.append_movement(&NewMovement {
                stock_id: stock.id,
                change_qty: qty,
                movement_type: MovementType::Return,
                reference: Some(reference.to_string()),
                created_by: actor.map(str::to_string),
                note: Some(format!("Reserved stock released for {reference}")),
            })?;
            Ok(StockChange {
                stock_id: stock.id,
                quantity_on_hand: new_on_hand,
                quantity_reserved: new_reserved,
                movement_id,
            })
        })
    }

    /// Set on-hand to an absolute value and record the delta as an
    /// `Adjustment` entry. Reserved is left unchanged; adjustment never
    /// creates a record.
    ///
    /// # Errors
    ///
    /// `NotFound` when no stock record exists for the key.
    pub fn adjust(
        &self,
        key: &StockKey,
        new_on_hand: i64,
        reason: &str,
        actor: Option<&str>,
    ) -> Result<StockChange, LedgerError> {
        self.check_key_exists(key)?;
        self.mutate("adjust", |tx| {
            let stock = tx
                .get_stock_for_update(key)?
                .ok_or(LedgerError::NotFound("stock record"))?;
            let old_on_hand = stock.quantity_on_hand;
            let delta = new_on_hand - old_on_hand;
            tx.update_quantities(stock.id, stock.version, new_on_hand, stock.quantity_reserved)?;
            let movement_id = tx.append_movement(&NewMovement {
                stock_id: stock.id,
                change_qty: delta,
                movement_type: MovementType::Adjustment,
                reference: Some(format!("Manual adjustment - {reason}")),
                created_by: actor.map(str::to_string),
                note: Some(format!(
                    "Stock adjusted from {old_on_hand} to {new_on_hand}. Reason: {reason}"
                )),
            })?;
            Ok(StockChange {
                stock_id: stock.id,
                quantity_on_hand: new_on_hand,
                quantity_reserved: stock.quantity_reserved,
                movement_id,
            })
        })
    }

    /// Move `qty` units between warehouses in one atomic operation: debit the
    /// source, credit (or create) the destination, and append paired
    /// `TransferOut`/`TransferIn` entries sharing `reference`.
    ///
    /// A created destination starts with `reserved = 0` and inherits the
    /// source's reorder level and unit cost.
    ///
    /// # Errors
    ///
    /// `NotFound` when the source record or a referenced entity is missing;
    /// `InsufficientStock` when the source has fewer than `qty` on hand
    /// (reserved units are not consulted).
    pub fn transfer(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
        from_warehouse_id: i64,
        to_warehouse_id: i64,
        qty: i64,
        reference: &str,
        actor: Option<&str>,
    ) -> Result<TransferOutcome, LedgerError> {
        let source_key = StockKey::new(product_id, variant_id, from_warehouse_id);
        self.check_key_exists(&source_key)?;
        if !self.store.warehouse_exists(to_warehouse_id)? {
            return Err(LedgerError::NotFound("warehouse"));
        }

        self.mutate("transfer", |tx| {
            let source = tx
                .get_stock_for_update(&source_key)?
                .ok_or(LedgerError::NotFound("source stock record"))?;
            if source.quantity_on_hand < qty {
                return Err(LedgerError::InsufficientStock {
                    available: source.quantity_on_hand,
                    requested: qty,
                });
            }
            let source_on_hand = source.quantity_on_hand - qty;
            tx.update_quantities(
                source.id,
                source.version,
                source_on_hand,
                source.quantity_reserved,
            )?;

            let destination_key = source_key.in_warehouse(to_warehouse_id);
            let (destination_stock_id, destination_on_hand) =
                match tx.get_stock_for_update(&destination_key)? {
                    Some(destination) => {
                        let new_on_hand = destination.quantity_on_hand + qty;
                        tx.update_quantities(
                            destination.id,
                            destination.version,
                            new_on_hand,
                            destination.quantity_reserved,
                        )?;
                        (destination.id, new_on_hand)
                    }
                    None => {
                        let id = tx.upsert_stock(&NewStockRecord {
                            product_id,
                            variant_id,
                            warehouse_id: to_warehouse_id,
                            quantity_on_hand: qty,
                            quantity_reserved: 0,
                            min_reorder_level: source.min_reorder_level,
                            last_cost: source.last_cost,
                        })?;
                        (id, qty)
                    }
                };

            let out_movement_id = tx.append_movement(&NewMovement {
                stock_id: source.id,
                change_qty: -qty,
                movement_type: MovementType::TransferOut,
                reference: Some(reference.to_string()),
                created_by: actor.map(str::to_string),
                note: Some(format!("Transferred to warehouse {to_warehouse_id}")),
            })?;
            let in_movement_id = tx.append_movement(&NewMovement {
                stock_id: destination_stock_id,
                change_qty: qty,
                movement_type: MovementType::TransferIn,
                reference: Some(reference.to_string()),
                created_by: actor.map(str::to_string),
                note: Some(format!("Transferred from warehouse {from_warehouse_id}")),
            })?;

            Ok(TransferOutcome {
                source_stock_id: source.id,
                source_on_hand,
                destination_stock_id,
                destination_on_hand,
                out_movement_id,
                in_movement_id,
            })
        })
    }

    // Reporting reads, passed through to the store.

    pub fn get_stock(&self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        self.store.get_stock(key)
    }

    pub fn stock_by_product(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        self.store.stock_by_product(product_id, variant_id)
    }

    pub fn stock_by_warehouse(&self, warehouse_id: i64) -> Result<Vec<StockRecord>, LedgerError> {
        self.store.stock_by_warehouse(warehouse_id)
    }

    pub fn all_stock(&self) -> Result<Vec<StockRecord>, LedgerError> {
        self.store.all_stock()
    }

    pub fn low_stock(&self, warehouse_id: Option<i64>) -> Result<Vec<StockRecord>, LedgerError> {
        self.store.low_stock(warehouse_id)
    }

    pub fn movements_by_stock(&self, stock_id: i64) -> Result<Vec<StockMovement>, LedgerError> {
        self.store.movements_by_stock(stock_id)
    }

    pub fn movements_by_type(
        &self,
        movement_type: MovementType,
        limit: u64,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        self.store.movements_by_type(movement_type, limit)
    }

    pub fn recent_movements(&self, limit: u64) -> Result<Vec<StockMovement>, LedgerError> {
        self.store.recent_movements(limit)
    }

    pub fn movement_stats(
        &self,
        warehouse_id: Option<i64>,
        window_days: u32,
    ) -> Result<Vec<MovementStat>, LedgerError> {
        self.store.movement_stats(warehouse_id, window_days)
    }
}
