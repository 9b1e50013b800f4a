//! Mutating-operation tests for the reconciliation engine, run over the
//! in-memory store.

use std::cell::Cell;

use rust_decimal::Decimal;
use stockroom::ledger::StockLedger;
use stockroom::model::{
    MovementStat, MovementType, NewMovement, NewStockRecord, StockKey, StockMovement, StockRecord,
};
use stockroom::store::memory::{MemoryLedgerStore, MemoryLedgerTx};
use stockroom::store::{LedgerStore, LedgerTx};
use stockroom::LedgerError;

fn seeded_store() -> MemoryLedgerStore {
    let store = MemoryLedgerStore::new();
    store.register_product(1, "Widget", "WID-001");
    store.register_product(2, "Gadget", "GAD-001");
    store.register_variant(10, 1, "WID-001-XL", None);
    store.register_warehouse(1, "Central");
    store.register_warehouse(2, "East");
    store
}

fn seed_stock(ledger: &StockLedger<impl LedgerStore>, key: &StockKey, on_hand: i64, reserved: i64) {
    ledger
        .set_stock(&NewStockRecord {
            product_id: key.product_id,
            variant_id: key.variant_id,
            warehouse_id: key.warehouse_id,
            quantity_on_hand: on_hand,
            quantity_reserved: reserved,
            min_reorder_level: 5,
            last_cost: Decimal::new(1250, 2),
        })
        .unwrap();
}

#[test]
fn reserve_moves_units_and_appends_one_sale_entry() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 100, 0);

    let change = ledger.reserve(&key, 3, "order-1001", Some("api")).unwrap();
    assert_eq!(change.quantity_on_hand, 97);
    assert_eq!(change.quantity_reserved, 3);

    let record = ledger.get_stock(&key).unwrap().unwrap();
    assert_eq!(record.quantity_on_hand, 97);
    assert_eq!(record.quantity_reserved, 3);

    let movements = ledger.movements_by_stock(change.stock_id).unwrap();
    assert_eq!(movements.len(), 1);
    let movement = &movements[0];
    assert_eq!(movement.movement_type, MovementType::Sale);
    assert_eq!(movement.change_qty, -3);
    assert_eq!(movement.reference.as_deref(), Some("order-1001"));
    assert_eq!(movement.created_by.as_deref(), Some("api"));
    assert_eq!(movement.note.as_deref(), Some("Stock reserved for order-1001"));
}

#[test]
fn reserve_more_than_on_hand_fails_and_changes_nothing() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 2, 0);

    let err = ledger.reserve(&key, 5, "order-1002", None).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            available: 2,
            requested: 5
        }
    ));

    let record = ledger.get_stock(&key).unwrap().unwrap();
    assert_eq!(record.quantity_on_hand, 2);
    assert_eq!(record.quantity_reserved, 0);
    assert!(ledger.movements_by_stock(record.id).unwrap().is_empty());
}

#[test]
fn release_clamps_reserved_at_zero() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 10, 1);

    let change = ledger.release(&key, 4, "order-1003", None).unwrap();
    assert_eq!(change.quantity_on_hand, 14);
    assert_eq!(change.quantity_reserved, 0);

    let movements = ledger.movements_by_stock(change.stock_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Return);
    assert_eq!(movements[0].change_qty, 4);
    assert_eq!(
        movements[0].note.as_deref(),
        Some("Reserved stock released for order-1003")
    );
}

#[test]
fn reserve_then_release_round_trips_quantities() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 50, 0);

    ledger.reserve(&key, 7, "order-1004", None).unwrap();
    let change = ledger.release(&key, 7, "order-1004", None).unwrap();
    assert_eq!(change.quantity_on_hand, 50);
    assert_eq!(change.quantity_reserved, 0);

    let movements = ledger.movements_by_stock(change.stock_id).unwrap();
    assert_eq!(movements.len(), 2);
}

#[test]
fn adjust_records_the_delta_and_leaves_reserved_alone() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 100, 6);

    let change = ledger.adjust(&key, 80, "damage", Some("warehouse-app")).unwrap();
    assert_eq!(change.quantity_on_hand, 80);
    assert_eq!(change.quantity_reserved, 6);

    let movements = ledger.movements_by_stock(change.stock_id).unwrap();
    assert_eq!(movements.len(), 1);
    let movement = &movements[0];
    assert_eq!(movement.movement_type, MovementType::Adjustment);
    assert_eq!(movement.change_qty, -20);
    assert_eq!(
        movement.reference.as_deref(),
        Some("Manual adjustment - damage")
    );
    assert_eq!(
        movement.note.as_deref(),
        Some("Stock adjusted from 100 to 80. Reason: damage")
    );
}

#[test]
fn adjust_never_creates_a_record() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(2, None, 1);

    let err = ledger.adjust(&key, 10, "cycle count", None).unwrap_err();
    assert!(matches!(err, LedgerError::NotFound("stock record")));
    assert!(ledger.get_stock(&key).unwrap().is_none());
}

#[test]
fn transfer_creates_the_destination_record() {
    let ledger = StockLedger::new(seeded_store());
    let source_key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &source_key, 50, 0);

    let outcome = ledger
        .transfer(1, None, 1, 2, 20, "rebalance-7", Some("ops"))
        .unwrap();
    assert_eq!(outcome.source_on_hand, 30);
    assert_eq!(outcome.destination_on_hand, 20);

    let source = ledger.get_stock(&source_key).unwrap().unwrap();
    assert_eq!(source.quantity_on_hand, 30);

    let destination = ledger
        .get_stock(&source_key.in_warehouse(2))
        .unwrap()
        .unwrap();
    assert_eq!(destination.quantity_on_hand, 20);
    assert_eq!(destination.quantity_reserved, 0);
    assert_eq!(destination.min_reorder_level, source.min_reorder_level);
    assert_eq!(destination.last_cost, source.last_cost);

    let out = &ledger.movements_by_stock(outcome.source_stock_id).unwrap()[0];
    assert_eq!(out.movement_type, MovementType::TransferOut);
    assert_eq!(out.change_qty, -20);
    assert_eq!(out.note.as_deref(), Some("Transferred to warehouse 2"));

    let inm = &ledger
        .movements_by_stock(outcome.destination_stock_id)
        .unwrap()[0];
    assert_eq!(inm.movement_type, MovementType::TransferIn);
    assert_eq!(inm.change_qty, 20);
    assert_eq!(inm.note.as_deref(), Some("Transferred from warehouse 1"));

    // Both legs carry the same reference.
    assert_eq!(out.reference.as_deref(), Some("rebalance-7"));
    assert_eq!(inm.reference, out.reference);
}

#[test]
fn transfer_credits_an_existing_destination() {
    let ledger = StockLedger::new(seeded_store());
    let source_key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &source_key, 50, 0);
    seed_stock(&ledger, &source_key.in_warehouse(2), 5, 2);

    let outcome = ledger
        .transfer(1, None, 1, 2, 10, "rebalance-8", None)
        .unwrap();
    assert_eq!(outcome.source_on_hand, 40);
    assert_eq!(outcome.destination_on_hand, 15);

    let destination = ledger
        .get_stock(&source_key.in_warehouse(2))
        .unwrap()
        .unwrap();
    assert_eq!(destination.quantity_on_hand, 15);
    assert_eq!(destination.quantity_reserved, 2);
}

#[test]
fn insufficient_transfer_changes_neither_warehouse() {
    let ledger = StockLedger::new(seeded_store());
    let source_key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &source_key, 5, 0);

    let err = ledger
        .transfer(1, None, 1, 2, 10, "rebalance-9", None)
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            available: 5,
            requested: 10
        }
    ));

    let source = ledger.get_stock(&source_key).unwrap().unwrap();
    assert_eq!(source.quantity_on_hand, 5);
    assert!(ledger
        .get_stock(&source_key.in_warehouse(2))
        .unwrap()
        .is_none());
    assert!(ledger.movements_by_stock(source.id).unwrap().is_empty());
}

#[test]
fn ledger_replays_to_the_current_on_hand() {
    let ledger = StockLedger::new(seeded_store());
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 100, 0);

    ledger.reserve(&key, 10, "order-2001", None).unwrap();
    ledger.release(&key, 4, "order-2001", None).unwrap();
    ledger.adjust(&key, 90, "cycle count", None).unwrap();
    ledger.transfer(1, None, 1, 2, 15, "rebalance-10", None).unwrap();

    let record = ledger.get_stock(&key).unwrap().unwrap();
    let replayed: i64 = ledger
        .movements_by_stock(record.id)
        .unwrap()
        .iter()
        .map(|m| m.change_qty)
        .sum();
    assert_eq!(100 + replayed, record.quantity_on_hand);
}

// Store wrapper that fails the next N version-guarded writes, for exercising
// the engine's bounded retry.
struct FlakyStore {
    inner: MemoryLedgerStore,
    conflicts_left: Cell<u32>,
}

impl FlakyStore {
    fn new(inner: MemoryLedgerStore, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts_left: Cell::new(conflicts),
        }
    }
}

struct FlakyTx<'a> {
    inner: MemoryLedgerTx<'a>,
    conflicts_left: &'a Cell<u32>,
}

impl LedgerStore for FlakyStore {
    type Tx<'a> = FlakyTx<'a>;

    fn begin(&self) -> Result<FlakyTx<'_>, LedgerError> {
        Ok(FlakyTx {
            inner: self.inner.begin()?,
            conflicts_left: &self.conflicts_left,
        })
    }

    fn get_stock(&self, key: &StockKey) -> Result<Option<StockRecord>, LedgerError> {
        self.inner.get_stock(key)
    }

    fn stock_by_product(
        &self,
        product_id: i64,
        variant_id: Option<i64>,
    ) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.stock_by_product(product_id, variant_id)
    }

    fn stock_by_warehouse(&self, warehouse_id: i64) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.stock_by_warehouse(warehouse_id)
    }

    fn all_stock(&self) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.all_stock()
    }

    fn low_stock(&self, warehouse_id: Option<i64>) -> Result<Vec<StockRecord>, LedgerError> {
        self.inner.low_stock(warehouse_id)
    }

    fn movements_by_stock(&self, stock_id: i64) -> Result<Vec<StockMovement>, LedgerError> {
        self.inner.movements_by_stock(stock_id)
    }

    fn movements_by_type(
        &self,
        movement_type: MovementType,
        limit: u64,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        self.inner.movements_by_type(movement_type, limit)
    }

    fn recent_movements(&self, limit: u64) -> Result<Vec<StockMovement>, LedgerError> {
        self.inner.recent_movements(limit)
    }

    fn movement_stats(
        &self,
        warehouse_id: Option<i64>,
        window_days: u32,
    ) -> Result<Vec<MovementStat>, LedgerError> {
        self.inner.movement_stats(warehouse_id, window_days)
    }

    fn product_exists(&self, product_id: i64) -> Result<bool, LedgerError> {
        self.inner.product_exists(product_id)
    }

    fn variant_exists(&self, variant_id: i64) -> Result<bool, LedgerError> {
        self.inner.variant_exists(variant_id)
    }

    fn warehouse_exists(&self, warehouse_id: i64) -> Result<bool, LedgerError> {
        self.inner.warehouse_exists(warehouse_id)
    }
}

impl LedgerTx for FlakyTx<'_> {
    fn get_stock_for_update(
        &mut self,
        key: &StockKey,
    ) -> Result<Option<StockRecord>, LedgerError> {
        self.inner.get_stock_for_update(key)
    }

    fn upsert_stock(&mut self, record: &NewStockRecord) -> Result<i64, LedgerError> {
        self.inner.upsert_stock(record)
    }

    fn update_quantities(
        &mut self,
        stock_id: i64,
        version: i64,
        quantity_on_hand: i64,
        quantity_reserved: i64,
    ) -> Result<(), LedgerError> {
        let left = self.conflicts_left.get();
        if left > 0 {
            self.conflicts_left.set(left - 1);
            return Err(LedgerError::ConcurrencyConflict);
        }
        self.inner
            .update_quantities(stock_id, version, quantity_on_hand, quantity_reserved)
    }

    fn append_movement(&mut self, movement: &NewMovement) -> Result<i64, LedgerError> {
        self.inner.append_movement(movement)
    }

    fn commit(self) -> Result<(), LedgerError> {
        self.inner.commit()
    }

    fn rollback(self) -> Result<(), LedgerError> {
        self.inner.rollback()
    }
}

#[test]
fn reserve_retries_through_transient_version_conflicts() {
    let store = FlakyStore::new(seeded_store(), 2);
    let ledger = StockLedger::new(store);
    let key = StockKey::new(1, None, 1);
    seed_stock(&ledger, &key, 30, 0);

    let change = ledger.reserve(&key, 5, "order-3001", None).unwrap();
    assert_eq!(change.quantity_on_hand, 25);
    assert_eq!(change.quantity_reserved, 5);

    // Exactly one committed attempt: a single Sale entry.
    let movements = ledger.movements_by_stock(change.stock_id).unwrap();
    assert_eq!(movements.len(), 1);
}

#[test]
fn persistent_version_conflicts_surface_after_bounded_retries() {
    let store = FlakyStore::new(seeded_store(), u32::MAX);
    let ledger = StockLedger::with_conflict_retries(store, 2);
    let key = StockKey::new(1, None, 1);

    // Seeding goes through upsert, which is not version-guarded.
    seed_stock(&ledger, &key, 30, 0);

    let err = ledger.reserve(&key, 5, "order-3002", None).unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrencyConflict));

    // 1 initial attempt + 2 retries consumed.
    assert_eq!(
        u32::MAX - ledger.store().conflicts_left.get(),
        3
    );

    let record = ledger.get_stock(&key).unwrap().unwrap();
    assert_eq!(record.quantity_on_hand, 30);
    assert_eq!(record.quantity_reserved, 0);
    assert!(ledger.movements_by_stock(record.id).unwrap().is_empty());
}
