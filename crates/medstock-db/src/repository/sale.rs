//! # Sale Repository
//!
//! Persists sales and returns. Every transition that touches stock writes
//! its status change and its ledger entries in one transaction.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE DRAFT                                                        │
//! │     └── create_draft(cart) → Sale { status: Draft }     (no ledger)     │
//! │     └── replace_lines(id, cart)                         (no ledger)     │
//! │                                                                         │
//! │  2. POST                                                                │
//! │     └── post(id) → Sale { status: Posted }                              │
//! │     └── one sale movement per line, same transaction                   │
//! │                                                                         │
//! │  3. (OPTIONAL) RETURN, repeatable until fully returned                 │
//! │     └── return_lines(id, requests) → Sale { status: Returned }          │
//! │     └── return_all(id)                                                  │
//! │     └── one return movement per returned line, same transaction        │
//! │                                                                         │
//! │  4. (DRAFT ONLY) VOID                                                   │
//! │     └── void(id) → Sale { status: Void }                (no ledger)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transaction Shape
//! Lock the medicines, `BEGIN`, bump `sales.updated_at` (takes the writer
//! lock), reload the sale, let `medstock-core` decide, write, `COMMIT`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::locks::{lock_set, MedicineGuard, MedicineLocks};
use crate::repository::ledger::{reverse_in, write_batch};
use medstock_core::{
    Cart, LedgerRef, Money, MovementEntry, ReturnLine, ReturnRequest, Sale, SaleLine, SaleReturn,
    SaleStatus, StockPolicy, UnitType,
};

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    status: SaleStatus,
    created_at: DateTime<Utc>,
    posted_at: Option<DateTime<Utc>>,
    voided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct SaleLineRow {
    medicine_id: String,
    name: String,
    unit_type: UnitType,
    unit_qty: i64,
    unit_factor: i64,
    base_quantity: i64,
    unit_price_cents: i64,
    line_total_cents: i64,
    unit_cost_cents: Option<i64>,
    returned_unit_qty: i64,
}

impl From<SaleLineRow> for SaleLine {
    fn from(row: SaleLineRow) -> Self {
        SaleLine {
            medicine_id: row.medicine_id,
            name: row.name,
            unit_type: row.unit_type,
            unit_qty: row.unit_qty,
            unit_factor: row.unit_factor,
            base_quantity: row.base_quantity,
            unit_price: Money::from_cents(row.unit_price_cents),
            line_total: Money::from_cents(row.line_total_cents),
            unit_cost: row.unit_cost_cents.map(Money::from_cents),
            returned_unit_qty: row.returned_unit_qty,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleReturnRow {
    id: String,
    sale_id: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReturnLineRow {
    medicine_id: String,
    unit_type: UnitType,
    unit_qty: i64,
    base_quantity: i64,
    refund_cents: i64,
}

impl From<ReturnLineRow> for ReturnLine {
    fn from(row: ReturnLineRow) -> Self {
        ReturnLine {
            medicine_id: row.medicine_id,
            unit_type: row.unit_type,
            unit_qty: row.unit_qty,
            base_quantity: row.base_quantity,
            refund: Money::from_cents(row.refund_cents),
        }
    }
}

/// A posted sale with the movements it wrote.
#[derive(Debug, Clone)]
pub struct PostedSale {
    pub sale: Sale,
    pub movements: Vec<MovementEntry>,
}

/// A booked return with the movements it wrote.
#[derive(Debug, Clone)]
pub struct BookedReturn {
    pub sale: Sale,
    pub sale_return: SaleReturn,
    pub movements: Vec<MovementEntry>,
}

// =============================================================================
// Connection-Level Queries
// =============================================================================

/// First write of every sale transaction.
async fn touch_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<()> {
    let result = sqlx::query("UPDATE sales SET updated_at = ?2 WHERE id = ?1")
        .bind(sale_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Sale", sale_id));
    }
    Ok(())
}

async fn fetch_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Option<Sale>> {
    let row: Option<SaleRow> = sqlx::query_as(
        "SELECT id, status, created_at, posted_at, voided_at FROM sales WHERE id = ?1",
    )
    .bind(sale_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lines: Vec<SaleLineRow> = sqlx::query_as(
        r#"
        SELECT
            medicine_id, name, unit_type, unit_qty, unit_factor, base_quantity,
            unit_price_cents, line_total_cents, unit_cost_cents, returned_unit_qty
        FROM sale_lines
        WHERE sale_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Sale {
        id: row.id,
        status: row.status,
        lines: lines.into_iter().map(SaleLine::from).collect(),
        created_at: row.created_at,
        posted_at: row.posted_at,
        voided_at: row.voided_at,
    }))
}

async fn require_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Sale> {
    fetch_sale(conn, sale_id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", sale_id))
}

async fn insert_lines(conn: &mut SqliteConnection, sale_id: &str, lines: &[SaleLine]) -> DbResult<()> {
    for (line_no, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sale_lines (
                sale_id, line_no, medicine_id, name,
                unit_type, unit_qty, unit_factor, base_quantity,
                unit_price_cents, line_total_cents, unit_cost_cents, returned_unit_qty
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(sale_id)
        .bind(line_no as i64)
        .bind(&line.medicine_id)
        .bind(&line.name)
        .bind(line.unit_type)
        .bind(line.unit_qty)
        .bind(line.unit_factor)
        .bind(line.base_quantity)
        .bind(line.unit_price.cents())
        .bind(line.line_total.cents())
        .bind(line.unit_cost.map(|c| c.cents()))
        .bind(line.returned_unit_qty)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn update_status(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE sales
        SET status = ?2, posted_at = ?3, voided_at = ?4, updated_at = ?5
        WHERE id = ?1
        "#,
    )
    .bind(&sale.id)
    .bind(sale.status)
    .bind(sale.posted_at)
    .bind(sale.voided_at)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_return(conn: &mut SqliteConnection, sale_return: &SaleReturn) -> DbResult<()> {
    sqlx::query("INSERT INTO sale_returns (id, sale_id, note, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&sale_return.id)
        .bind(&sale_return.sale_id)
        .bind(&sale_return.note)
        .bind(sale_return.created_at)
        .execute(&mut *conn)
        .await?;

    for line in &sale_return.lines {
        sqlx::query(
            r#"
            INSERT INTO sale_return_lines (
                return_id, medicine_id, unit_type, unit_qty, base_quantity, refund_cents
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&sale_return.id)
        .bind(&line.medicine_id)
        .bind(line.unit_type)
        .bind(line.unit_qty)
        .bind(line.base_quantity)
        .bind(line.refund.cents())
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE sale_lines
            SET returned_unit_qty = returned_unit_qty + ?3
            WHERE sale_id = ?1 AND medicine_id = ?2
            "#,
        )
        .bind(&sale_return.sale_id)
        .bind(&line.medicine_id)
        .bind(line.unit_qty)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Fails if the sale gained a medicine that was not locked.
fn ensure_locked(guard: &MedicineGuard, sale: &Sale) -> DbResult<()> {
    if sale.lines.iter().all(|l| guard.covers(&l.medicine_id)) {
        Ok(())
    } else {
        Err(DbError::concurrent("Sale", &sale.id))
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for sale persistence and lifecycle transitions.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
    locks: Arc<MedicineLocks>,
    policy: StockPolicy,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool, locks: Arc<MedicineLocks>, policy: StockPolicy) -> Self {
        SaleRepository { pool, locks, policy }
    }

    /// Gets a sale with its lines.
    pub async fn get(&self, sale_id: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale(&mut conn, sale_id).await
    }

    async fn require(&self, sale_id: &str) -> DbResult<Sale> {
        self.get(sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))
    }

    /// Saves the cart as a new draft. Nothing touches the ledger.
    ///
    /// ## Snapshot Pattern
    /// Name, unit factor, price and cost are copied onto the sale lines, so
    /// later catalog edits do not change a recorded sale.
    pub async fn create_draft(&self, cart: Cart) -> DbResult<Sale> {
        let sale = Sale::draft(cart);
        debug!(sale_id = %sale.id, lines = sale.lines.len(), "Creating draft sale");

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO sales (id, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        )
        .bind(&sale.id)
        .bind(sale.status)
        .bind(sale.created_at)
        .execute(&mut *tx)
        .await?;
        insert_lines(&mut tx, &sale.id, &sale.lines).await?;
        tx.commit().await?;

        Ok(sale)
    }

    /// Replaces the lines of a draft with the current cart.
    pub async fn replace_lines(&self, sale_id: &str, cart: Cart) -> DbResult<Sale> {
        let mut tx = self.pool.begin().await?;
        touch_sale(&mut tx, sale_id).await?;

        let mut sale = require_sale(&mut tx, sale_id).await?;
        sale.replace_lines(cart)?;

        sqlx::query("DELETE FROM sale_lines WHERE sale_id = ?1")
            .bind(sale_id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, sale_id, &sale.lines).await?;
        tx.commit().await?;

        debug!(sale_id = %sale_id, lines = sale.lines.len(), "Draft lines replaced");
        Ok(sale)
    }

    /// Posts a draft: one sale movement per line, all or nothing.
    ///
    /// ## Errors
    /// - `InsufficientStock`: nothing written, sale stays draft
    /// - `InvalidSaleStatus`: sale is not a draft
    /// - `EmptySale`: draft has no lines
    pub async fn post(&self, sale_id: &str) -> DbResult<PostedSale> {
        let peek = self.require(sale_id).await?;
        let guard = self
            .locks
            .acquire(lock_set(peek.lines.iter().map(|l| l.medicine_id.as_str())))
            .await;

        let mut tx = self.pool.begin().await?;
        touch_sale(&mut tx, sale_id).await?;

        let mut sale = require_sale(&mut tx, sale_id).await?;
        ensure_locked(&guard, &sale)?;

        let postings = sale.postings()?;
        let movements = write_batch(&mut tx, &postings, self.policy).await?;
        sale.mark_posted(Utc::now())?;
        update_status(&mut tx, &sale).await?;
        tx.commit().await?;

        info!(sale_id = %sale.id, movements = movements.len(), total = %sale.total(), "Sale posted");
        Ok(PostedSale { sale, movements })
    }

    /// Books a (partial) return against a posted sale.
    ///
    /// Returned quantities accumulate per line across calls; asking for more
    /// than remains fails with `OverReturn` and writes nothing.
    pub async fn return_lines(
        &self,
        sale_id: &str,
        requests: &[ReturnRequest],
        note: Option<String>,
    ) -> DbResult<BookedReturn> {
        let _guard = self
            .locks
            .acquire(lock_set(requests.iter().map(|r| r.medicine_id.as_str())))
            .await;

        let mut tx = self.pool.begin().await?;
        touch_sale(&mut tx, sale_id).await?;

        let mut sale = require_sale(&mut tx, sale_id).await?;
        let sale_return = sale.plan_return(requests, note)?;
        let movements = write_batch(&mut tx, &sale_return.postings(), self.policy).await?;

        insert_return(&mut tx, &sale_return).await?;
        sale.apply_return(&sale_return)?;
        update_status(&mut tx, &sale).await?;
        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            return_id = %sale_return.id,
            refund = %sale_return.refund_total(),
            fully_returned = sale.is_fully_returned(),
            "Return booked"
        );
        Ok(BookedReturn {
            sale,
            sale_return,
            movements,
        })
    }

    /// Returns everything not yet returned.
    ///
    /// For a sale with no earlier returns the ledger side is a straight
    /// reversal of the sale's movements.
    pub async fn return_all(&self, sale_id: &str, note: Option<String>) -> DbResult<BookedReturn> {
        let peek = self.require(sale_id).await?;
        let guard = self
            .locks
            .acquire(lock_set(peek.lines.iter().map(|l| l.medicine_id.as_str())))
            .await;

        let mut tx = self.pool.begin().await?;
        touch_sale(&mut tx, sale_id).await?;

        let mut sale = require_sale(&mut tx, sale_id).await?;
        ensure_locked(&guard, &sale)?;

        let sale_return = sale.plan_return(&sale.remaining_return_requests(), note)?;
        let movements = if sale.has_returns() {
            write_batch(&mut tx, &sale_return.postings(), self.policy).await?
        } else {
            reverse_in(
                &mut tx,
                &LedgerRef::sale(sale.id.clone()),
                &sale_return.reference(),
                self.policy,
            )
            .await?
        };

        insert_return(&mut tx, &sale_return).await?;
        sale.apply_return(&sale_return)?;
        update_status(&mut tx, &sale).await?;
        tx.commit().await?;

        info!(sale_id = %sale.id, return_id = %sale_return.id, "Sale fully returned");
        Ok(BookedReturn {
            sale,
            sale_return,
            movements,
        })
    }

    /// Voids a draft. A posted sale must be returned in full instead.
    pub async fn void(&self, sale_id: &str) -> DbResult<Sale> {
        let mut tx = self.pool.begin().await?;
        touch_sale(&mut tx, sale_id).await?;

        let mut sale = require_sale(&mut tx, sale_id).await?;
        sale.void(Utc::now())?;
        update_status(&mut tx, &sale).await?;
        tx.commit().await?;

        info!(sale_id = %sale_id, "Sale voided");
        Ok(sale)
    }

    /// All returns booked against a sale, oldest first.
    pub async fn returns_for(&self, sale_id: &str) -> DbResult<Vec<SaleReturn>> {
        let mut conn = self.pool.acquire().await?;

        let rows: Vec<SaleReturnRow> = sqlx::query_as(
            "SELECT id, sale_id, note, created_at FROM sale_returns WHERE sale_id = ?1 ORDER BY created_at, id",
        )
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut returns = Vec::with_capacity(rows.len());
        for row in rows {
            let lines: Vec<ReturnLineRow> = sqlx::query_as(
                r#"
                SELECT medicine_id, unit_type, unit_qty, base_quantity, refund_cents
                FROM sale_return_lines
                WHERE return_id = ?1
                ORDER BY medicine_id
                "#,
            )
            .bind(&row.id)
            .fetch_all(&mut *conn)
            .await?;

            returns.push(SaleReturn {
                id: row.id,
                sale_id: row.sale_id,
                lines: lines.into_iter().map(ReturnLine::from).collect(),
                note: row.note,
                created_at: row.created_at,
            });
        }

        Ok(returns)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
