//! Schema for the stock ledger tables.
//!
//! Provides sea-query statement builders for the `stock` and
//! `stock_movements` tables plus an idempotent raw-SQL bootstrap
//! (`initialize_schema`). The uniqueness constraint on
//! (product_id, variant_id, warehouse_id) uses `NULLS NOT DISTINCT` so the
//! base-product row (variant NULL) participates in upsert conflict detection;
//! sea-query has no builder for that clause, hence the raw index statement.

use sea_query::{
    ColumnDef, Expr, ExprTrait, Index, IndexCreateStatement, Keyword, Table, TableCreateStatement,
};

use crate::error::StoreError;
use crate::executor::StoreExecutor;

/// Create the `stock` table statement.
///
/// One row per (product, variant-or-none, warehouse) triple. `version` is the
/// optimistic concurrency column bumped by every quantity write.
pub fn create_stock_table() -> TableCreateStatement {
    Table::create()
        .table("stock")
        .col(
            ColumnDef::new("id")
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("product_id").big_integer().not_null())
        .col(ColumnDef::new("variant_id").big_integer().null())
        .col(ColumnDef::new("warehouse_id").big_integer().not_null())
        .col(
            ColumnDef::new("quantity_on_hand")
                .big_integer()
                .not_null()
                .default(0)
                .check(Expr::col("quantity_on_hand").gte(0)),
        )
        .col(
            ColumnDef::new("quantity_reserved")
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new("min_reorder_level")
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new("last_cost")
                .decimal_len(12, 4)
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new("version").big_integer().not_null().default(1))
        .col(
            ColumnDef::new("updated_at")
                .timestamp_with_time_zone()
                .not_null()
                .default(Keyword::CurrentTimestamp),
        )
        .to_owned()
}

/// Create the `stock_movements` ledger table statement.
///
/// Append-only; rows are never updated or deleted while their stock record
/// lives (deletion cascades belong to the storage layer).
pub fn create_stock_movements_table() -> TableCreateStatement {
    Table::create()
        .table("stock_movements")
        .col(
            ColumnDef::new("id")
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new("stock_id").big_integer().not_null())
        .col(ColumnDef::new("change_qty").big_integer().not_null())
        .col(ColumnDef::new("movement_type").string_len(32).not_null())
        .col(ColumnDef::new("reference").string_len(255).null())
        .col(ColumnDef::new("created_by").string_len(255).null())
        .col(ColumnDef::new("note").text().null())
        .col(
            ColumnDef::new("created_at")
                .timestamp_with_time_zone()
                .not_null()
                .default(Keyword::CurrentTimestamp),
        )
        .to_owned()
}

/// Index on `stock_movements.stock_id` for per-record ledger reads.
pub fn create_movements_stock_id_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_stock_movements_stock_id")
        .table("stock_movements")
        .col("stock_id")
        .to_owned()
}

/// Index on `stock_movements.created_at` for newest-first queries and the
/// trailing-window statistics.
pub fn create_movements_created_at_index() -> IndexCreateStatement {
    Index::create()
        .name("idx_stock_movements_created_at")
        .table("stock_movements")
        .col("created_at")
        .to_owned()
}

/// Initialize the ledger schema.
///
/// Creates the `stock` and `stock_movements` tables and their indexes if they
/// don't exist. Reference tables (`products`, `product_variants`,
/// `warehouses`) are owned by the CRUD layer and must already exist.
///
/// # Errors
///
/// Returns `StoreError` if any DDL statement fails.
pub fn initialize_schema(executor: &dyn StoreExecutor) -> Result<(), StoreError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS stock (
            id BIGSERIAL PRIMARY KEY,
            product_id BIGINT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            variant_id BIGINT REFERENCES product_variants(id) ON DELETE CASCADE,
            warehouse_id BIGINT NOT NULL REFERENCES warehouses(id) ON DELETE CASCADE,
            quantity_on_hand BIGINT NOT NULL DEFAULT 0 CHECK (quantity_on_hand >= 0),
            quantity_reserved BIGINT NOT NULL DEFAULT 0,
            min_reorder_level BIGINT NOT NULL DEFAULT 0,
            last_cost NUMERIC(12, 4) NOT NULL DEFAULT 0,
            version BIGINT NOT NULL DEFAULT 1,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_stock_product_variant_warehouse
        ON stock (product_id, variant_id, warehouse_id) NULLS NOT DISTINCT
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS stock_movements (
            id BIGSERIAL PRIMARY KEY,
            stock_id BIGINT NOT NULL REFERENCES stock(id) ON DELETE CASCADE,
            change_qty BIGINT NOT NULL,
            movement_type VARCHAR(32) NOT NULL,
            reference VARCHAR(255),
            created_by VARCHAR(255),
            note TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_stock_movements_stock_id ON stock_movements (stock_id)",
        "CREATE INDEX IF NOT EXISTS idx_stock_movements_created_at ON stock_movements (created_at)",
    ];

    for sql in statements {
        executor.execute(sql, &[])?;
    }
    log::debug!("stock ledger schema initialized");
    Ok(())
}
