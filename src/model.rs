//! Domain records for the stock ledger.
//!
//! `StockRecord` is the per-(product, variant, warehouse) quantity row;
//! `StockMovement` is one immutable entry in the append-only movement ledger.
//! The `New*` types carry the insertable field sets (ids and timestamps are
//! server-assigned).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Composite lookup key for a stock record.
///
/// `variant_id = None` addresses the base-product row (stored as SQL NULL),
/// not "any variant".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
}

impl StockKey {
    pub fn new(product_id: i64, variant_id: Option<i64>, warehouse_id: i64) -> Self {
        Self {
            product_id,
            variant_id,
            warehouse_id,
        }
    }

    /// Same key, different warehouse. Used by transfers for the destination lookup.
    pub fn in_warehouse(&self, warehouse_id: i64) -> Self {
        Self {
            warehouse_id,
            ..*self
        }
    }
}

/// One quantity record per (product, variant-or-none, warehouse) triple.
///
/// `quantity_reserved` is tracked net of `quantity_on_hand`: reserving moves
/// units out of on-hand and into reserved. `version` is the optimistic
/// concurrency column; every quantity write bumps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: i64,
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub min_reorder_level: i64,
    pub last_cost: Decimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    // joined fields for display (optional)
    pub product_name: Option<String>,
    pub product_sku: Option<String>,
    pub variant_sku: Option<String>,
    pub warehouse_name: Option<String>,
}

impl StockRecord {
    /// Key of this record.
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id, self.warehouse_id)
    }

    /// Whether the record qualifies for the low-stock report.
    pub fn is_low_stock(&self) -> bool {
        self.quantity_on_hand <= self.min_reorder_level
    }
}

/// Insertable field set for `upsert_stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockRecord {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub warehouse_id: i64,
    pub quantity_on_hand: i64,
    pub quantity_reserved: i64,
    pub min_reorder_level: i64,
    pub last_cost: Decimal,
}

impl NewStockRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.variant_id, self.warehouse_id)
    }
}

/// Typed reason for a quantity change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Adjustment,
    Sale,
    Return,
    TransferOut,
    TransferIn,
}

impl MovementType {
    /// Storage representation (column value in `stock_movements.movement_type`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Adjustment => "adjustment",
            MovementType::Sale => "sale",
            MovementType::Return => "return",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adjustment" => Ok(MovementType::Adjustment),
            "sale" => Ok(MovementType::Sale),
            "return" => Ok(MovementType::Return),
            "transfer_out" => Ok(MovementType::TransferOut),
            "transfer_in" => Ok(MovementType::TransferIn),
            other => Err(StoreError::Parse(format!("unknown movement type: {other}"))),
        }
    }
}

/// One immutable entry in the movement ledger.
///
/// Never updated or deleted after creation. The sum of `change_qty` for a
/// `stock_id`, applied in creation order, replays that record's on-hand
/// transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: i64,
    pub stock_id: i64,
    pub change_qty: i64,
    pub movement_type: MovementType,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    // joined fields for display (optional)
    pub product_name: Option<String>,
    pub warehouse_name: Option<String>,
}

/// Insertable field set for a ledger append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub stock_id: i64,
    pub change_qty: i64,
    pub movement_type: MovementType,
    pub reference: Option<String>,
    pub created_by: Option<String>,
    pub note: Option<String>,
}

/// Per-type movement aggregate over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementStat {
    pub movement_type: MovementType,
    pub movement_count: i64,
    pub total_qty_change: i64,
    pub avg_qty_change: Decimal,
}

/// Typed variant attributes (size, colour, ...).
///
/// The storage layer keeps these as a JSON object of string pairs; callers
/// get a typed map instead of a text blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantAttributes(pub BTreeMap<String, String>);

impl VariantAttributes {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Decode from the stored JSON object.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json)
            .map_err(|e| StoreError::Parse(format!("invalid variant attributes: {e}")))
    }

    /// Encode to the stored JSON object.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self)
            .map_err(|e| StoreError::Parse(format!("unencodable variant attributes: {e}")))
    }
}
