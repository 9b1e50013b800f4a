//! In-memory implementation of the storage interface.
//!
//! Serializes transactions behind one mutex and keeps an undo snapshot per
//! transaction, so commit/rollback semantics match the relational store:
//! dropping a transaction without committing discards its writes, and
//! version-guarded quantity writes surface `ConcurrencyConflict` on a stale
//! version. Reference entities (products, variants, warehouses) are held in
//! small registries so name-ordered queries and existence checks behave like
//! the joined SQL reads.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{LedgerError, StoreError};
use crate::model::{
    MovementStat, MovementType, NewMovement, NewStockRecord, StockKey, StockMovement, StockRecord,
    VariantAttributes,
};
use crate::store::{LedgerStore, LedgerTx};

#[derive(Debug, Clone)]
struct ProductEntry {
    name: String,
    sku: String,
}

#[derive(Debug, Clone)]
struct VariantEntry {
    #[allow(dead_code)]
    product_id: i64,
    sku: String,
    #[allow(dead_code)]
    attributes: Option<VariantAttributes>,
}

#[derive(Debug, Clone, Default)]
struct MemInner {
    stock: Vec<StockRecord>,
    movements: Vec<StockMovement>,
    products: BTreeMap<i64, ProductEntry>,
    variants: BTreeMap<i64, VariantEntry>,
    warehouses: BTreeMap<i64, String>,
    next_stock_id: i64,
    next_movement_id: i64,
}

impl MemInner {
    fn stock_by_key(&self, key: &StockKey) -> Option<&StockRecord> {
        self.stock.iter().find(|s| {
            s.product_id == key.product_id
                && s.variant_id == key.variant_id
                && s.warehouse_id == key.warehouse_id
        })
    }

    fn product_name(&self, product_id: i64) -> Option<String> {
        self.products.get(&product_id).map(|p| p.name.clone())
    }

    fn warehouse_name(&self, warehouse_id: i64) -> Option<String> {
        self.warehouses.get(&warehouse_id).cloned()
    }

    // Mirrors the joined SELECT columns of the relational store.
    fn with_display(&self, record: &StockRecord) -> StockRecord {
        let mut out = record.clone();
        if let Some(product) = self.products.get(&record.product_id) {
            out.product_name = Some(product.name.clone());
            out.product_sku = Some(product.sku.clone());
        }
        out.variant_sku = record
            .variant_id
            .and_then(|id| self.variants.get(&id))
            .map(|v| v.sku.clone());
        out.warehouse_name = self.warehouse_name(record.warehouse_id);
        out
    }

    fn movement_with_display(&self, movement: &StockMovement) -> StockMovement {
        let mut out = movement.clone();
        if let Some(stock) = self.stock.iter().find(|s| s.id == movement.stock_id) {
            out.product_name = self.product_name(stock.product_id);
            out.warehouse_name = self.warehouse_name(stock.warehouse_id);
        }
        out
    }

    fn warehouse_sort_key(&self, record: &StockRecord) -> String {
        self.warehouse_name(record.warehouse_id).unwrap_or_default()
    }

    fn product_sort_key(&self, record: &StockRecord) -> String {
        self.product_name(record.product_id).unwrap_or_default()
    }
}

/// Transactional in-memory ledger store.
///
/// # Examples
///
/// ```
/// use stockroom::store::memory::MemoryLedgerStore;
/// use stockroom::store::LedgerStore;
///
/// let store = MemoryLedgerStore::new();
/// store.register_product(1, "Widget", "WID-001");
/// store.register_warehouse(1, "Central");
/// assert!(store.product_exists(1).unwrap());
/// ```
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<MemInner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemInner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Storage(StoreError::Other("store mutex poisoned".into())))
    }

    /// Register a product reference entity.
    pub fn register_product(&self, id: i64, name: &str, sku: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.products.insert(
                id,
                ProductEntry {
                    name: name.to_string(),
                    sku: sku.to_string(),
                },
            );
        }
    }

    /// Register a product variant reference entity.
    pub fn register_variant(
        &self,
        id: i64,
        product_id: i64,
        sku: &str,
        attributes: Option<VariantAttributes>,
    ) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.variants.insert(
                id,
                VariantEntry {
                    product_id,
                    sku: sku.to_string(),
                    attributes,
                },
            );
        }
    }

    /// Register a warehouse reference entity.
    pub fn register_warehouse(&self, id: i64, name: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.warehouses.insert(id, name.to_string());
        }
    }
}

/// Open transaction against the memory store.
///
/// Holds the store lock for its lifetime; dropping without `commit`
/// restores the pre-transaction state.
pub struct MemoryLedgerTx<'a> {
    guard: MutexGuard<'a, MemInner>,
    snapshot: Option<MemInner>,
    committed: bool,
}

impl LedgerStore for MemoryLedgerStore {
    type Tx<'a> = MemoryLedgerTx<'a>;

    fn begin(&self) -> Result<MemoryLedgerTx<'_>, LedgerError> {
        let guard = self.lock()?;
        let snapshot = Some(guard.clone());
        Ok(MemoryLedgerTx {
            guard,
            snapshot,
            committed: false,
        })
    }

    fn get_stock(&self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner.stock_by_key(key).map(|s| inner.with_display(s)))
    }

    fn stock_by_product(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        let inner = self.lock()?;
        let mut records: Vec<StockRecord> = inner
            .stock
            .iter()
            .filter(|s| s.product_id == product_id)
            .filter(|s| variant_id.is_none() || s.variant_id == variant_id)
            .map(|s| inner.with_display(s))
            .collect();
        records.sort_by_key(|r| inner.warehouse_sort_key(r));
        Ok(records)
    }

    fn stock_by_warehouse(&self, warehouse_id: i64) -> Result<Vec<StockRecord>, LedgerError> {
        let inner = self.lock()?;
        let mut records: Vec<StockRecord> = inner
            .stock
            .iter()
            .filter(|s| s.warehouse_id == warehouse_id)
            .map(|s| inner.with_display(s))
            .collect();
        records.sort_by_key(|r| inner.product_sort_key(r));
        Ok(records)
    }

    fn all_stock(&self) -> Result<Vec<StockRecord>, LedgerError> {
        let inner = self.lock()?;
        let mut records: Vec<StockRecord> =
            inner.stock.iter().map(|s| inner.with_display(s)).collect();
        records.sort_by_key(|r| (inner.warehouse_sort_key(r), inner.product_sort_key(r)));
        Ok(records)
    }

    fn low_stock(&self, warehouse_id: Option<i64>) -> Result<Vec<StockRecord>, LedgerError> {
        let inner = self.lock()?;
        let mut records: Vec<StockRecord> = inner
            .stock
            .iter()
            .filter(|s| s.is_low_stock())
            .filter(|s| warehouse_id.map_or(true, |w| s.warehouse_id == w))
            .map(|s| inner.with_display(s))
            .collect();
        records.sort_by_key(|r| r.quantity_on_hand);
        Ok(records)
    }

    fn movements_by_stock(&self, stock_id: i64) -> Result<Vec<StockMovement>, LedgerError> {
        let inner = self.lock()?;
        let mut movements: Vec<StockMovement> = inner
            .movements
            .iter()
            .filter(|m| m.stock_id == stock_id)
            .map(|m| inner.movement_with_display(m))
            .collect();
        movements.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        Ok(movements)
    }

    fn movements_by_type(
        &self,
        movement_type: MovementType,
        limit: u64,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let inner = self.lock()?;
        let mut movements: Vec<StockMovement> = inner
            .movements
            .iter()
            .filter(|m| m.movement_type == movement_type)
            .map(|m| inner.movement_with_display(m))
            .collect();
        movements.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        movements.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(movements)
    }

    fn recent_movements(&self, limit: u64) -> Result<Vec<StockMovement>, LedgerError> {
        let inner = self.lock()?;
        let mut movements: Vec<StockMovement> = inner
            .movements
            .iter()
            .map(|m| inner.movement_with_display(m))
            .collect();
        movements.sort_by_key(|m| std::cmp::Reverse((m.created_at, m.id)));
        movements.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(movements)
    }

    fn movement_stats(
        &self,
        warehouse_id: Option<i64>,
        window_days: u32,
    ) -> Result<Vec<MovementStat>, LedgerError> {
        let inner = self.lock()?;
        let cutoff = Utc::now() - Duration::days(i64::from(window_days));

        let mut grouped: BTreeMap<&'static str, (MovementType, i64, i64)> = BTreeMap::new();
        for movement in &inner.movements {
            if movement.created_at < cutoff {
                continue;
            }
            if let Some(w) = warehouse_id {
                let in_warehouse = inner
                    .stock
                    .iter()
                    .any(|s| s.id == movement.stock_id && s.warehouse_id == w);
                if !in_warehouse {
                    continue;
                }
            }
            let entry = grouped
                .entry(movement.movement_type.as_str())
                .or_insert((movement.movement_type, 0, 0));
            entry.1 += 1;
            entry.2 += movement.change_qty;
        }

        let mut stats: Vec<MovementStat> = grouped
            .into_values()
            .map(|(movement_type, count, total)| MovementStat {
                movement_type,
                movement_count: count,
                total_qty_change: total,
                avg_qty_change: Decimal::from(total) / Decimal::from(count),
            })
            .collect();
        stats.sort_by_key(|s| std::cmp::Reverse(s.movement_count));
        Ok(stats)
    }

    fn product_exists(&self, product_id: i64) -> Result<bool, LedgerError> {
        Ok(self.lock()?.products.contains_key(&product_id))
    }

    fn variant_exists(&self, variant_id: i64) -> Result<bool, LedgerError> {
        Ok(self.lock()?.variants.contains_key(&variant_id))
    }

    fn warehouse_exists(&self, warehouse_id: i64) -> Result<bool, LedgerError> {
        Ok(self.lock()?.warehouses.contains_key(&warehouse_id))
    }
}

impl LedgerTx for MemoryLedgerTx<'_> {
    fn get_stock_for_update(
        &mut self,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, LedgerError> {
        // The store lock is already held for the transaction, which is this
        // backend's row lock.
        Ok(self.guard.stock_by_key(key).cloned())
    }

    fn upsert_stock(&mut self, record: &NewStockRecord) -> Result<i64, LedgerError> {
        if record.quantity_on_hand < 0 {
            return Err(LedgerError::Storage(StoreError::Other(
                "quantity_on_hand must not be negative".into(),
            )));
        }
        let key = record.key();
        if let Some(existing) = self.guard.stock.iter_mut().find(|s| {
            s.product_id == key.product_id
                && s.variant_id == key.variant_id
                && s.warehouse_id == key.warehouse_id
        }) {
            existing.quantity_on_hand = record.quantity_on_hand;
            existing.quantity_reserved = record.quantity_reserved;
            existing.min_reorder_level = record.min_reorder_level;
            existing.last_cost = record.last_cost;
            existing.version += 1;
            existing.updated_at = Utc::now();
            return Ok(existing.id);
        }

        self.guard.next_stock_id += 1;
        let id = self.guard.next_stock_id;
        self.guard.stock.push(StockRecord {
            id,
            product_id: record.product_id,
            variant_id: record.variant_id,
            warehouse_id: record.warehouse_id,
            quantity_on_hand: record.quantity_on_hand,
            quantity_reserved: record.quantity_reserved,
            min_reorder_level: record.min_reorder_level,
            last_cost: record.last_cost,
            version: 1,
            updated_at: Utc::now(),
            product_name: None,
            product_sku: None,
            variant_sku: None,
            warehouse_name: None,
        });
        Ok(id)
    }

    fn update_quantities(
        &mut self,
        stock_id: i64,
        version: i64,
        quantity_on_hand: i64,
        quantity_reserved: i64,
    ) -> Result<(), LedgerError> {
        if quantity_on_hand < 0 {
            return Err(LedgerError::Storage(StoreError::Other(
                "quantity_on_hand must not be negative".into(),
            )));
        }
        let record = self
            .guard
            .stock
            .iter_mut()
            .find(|s| s.id == stock_id && s.version == version);
        match record {
            Some(record) => {
                record.quantity_on_hand = quantity_on_hand;
                record.quantity_reserved = quantity_reserved;
                record.version += 1;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(LedgerError::ConcurrencyConflict),
        }
    }

    fn append_movement(&mut self, movement: &NewMovement) -> Result<i64, LedgerError> {
        self.guard.next_movement_id += 1;
        let id = self.guard.next_movement_id;
        self.guard.movements.push(StockMovement {
            id,
            stock_id: movement.stock_id,
            change_qty: movement.change_qty,
            movement_type: movement.movement_type,
            reference: movement.reference.clone(),
            created_by: movement.created_by.clone(),
            note: movement.note.clone(),
            created_at: Utc::now(),
            product_name: None,
            warehouse_name: None,
        });
        Ok(id)
    }

    fn commit(mut self) -> Result<(), LedgerError> {
        self.committed = true;
        self.snapshot = None;
        Ok(())
    }

    fn rollback(mut self) -> Result<(), LedgerError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for MemoryLedgerTx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                *self.guard = snapshot;
            }
        }
    }
}
