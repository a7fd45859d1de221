//! Order Ledger: the priced contract that gates progress billing.
//!
//! Lines are editable only while the order is unlocked; every edit recomputes
//! the aggregate totals so `subtotal`, `vat_amount` and `total` never go stale.
//! Locking ("verrouillage") validates the order and opens it to progress
//! statements.

use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::fixedpoint::{Micros, Qty, VatRate};
use crate::types::{NewOrderLine, Order, OrderLine, OrderStatus, Scope};

impl Order {
    /// A new, empty, unlocked order in `Draft` status.
    pub fn new(id: Uuid, scope: Scope, vat_rate: VatRate) -> Result<Self> {
        if vat_rate.bps() < 0 {
            return Err(LedgerError::invalid("vat_rate", "must be >= 0"));
        }
        if scope.order_id() != id {
            return Err(LedgerError::invalid(
                "scope",
                format!("scope order {} does not match order id {id}", scope.order_id()),
            ));
        }
        Ok(Self {
            id,
            scope,
            lines: Vec::new(),
            subtotal: Micros::ZERO,
            vat_rate,
            vat_amount: Micros::ZERO,
            total: Micros::ZERO,
            locked: false,
            status: OrderStatus::Draft,
        })
    }

    pub fn line(&self, line_id: Uuid) -> Option<&OrderLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    /// Append a line and recompute totals.
    ///
    /// # Errors
    /// [`LedgerError::OrderLocked`] when locked; validation errors for
    /// negative price/quantity or overflow. The order is unchanged on error.
    pub fn add_line(&mut self, line_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
        self.ensure_unlocked()?;
        let built = build_line(line_id, line)?;
        let mut next = self.lines.clone();
        next.push(built.clone());
        self.commit_lines(next)?;
        Ok(built)
    }

    /// Replace an existing line's content, keeping its id.
    pub fn update_line(&mut self, line_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
        self.ensure_unlocked()?;
        let idx = self.line_index(line_id)?;
        let built = build_line(line_id, line)?;
        let mut next = self.lines.clone();
        next[idx] = built.clone();
        self.commit_lines(next)?;
        Ok(built)
    }

    pub fn remove_line(&mut self, line_id: Uuid) -> Result<OrderLine> {
        self.ensure_unlocked()?;
        let idx = self.line_index(line_id)?;
        let mut next = self.lines.clone();
        let removed = next.remove(idx);
        self.commit_lines(next)?;
        Ok(removed)
    }

    /// subtotal = Σ(unit_price × quantity); vat = subtotal × rate;
    /// total = subtotal + vat.
    pub fn recompute_totals(&mut self) -> Result<()> {
        let (subtotal, vat_amount, total) = compute_totals(&self.lines, self.vat_rate)?;
        self.subtotal = subtotal;
        self.vat_amount = vat_amount;
        self.total = total;
        Ok(())
    }

    /// Lock the order and mark it validated. Idempotent: returns `false`
    /// when the order was already locked.
    pub fn lock(&mut self) -> bool {
        if self.locked {
            debug!(order_id = %self.id, "lock: already locked");
            return false;
        }
        self.locked = true;
        self.status = OrderStatus::Validated;
        true
    }

    /// Unlock the order back to draft. Unconditional; returns `false` when
    /// it was already unlocked.
    pub fn unlock(&mut self) -> bool {
        if !self.locked {
            return false;
        }
        self.locked = false;
        self.status = OrderStatus::Draft;
        true
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(LedgerError::OrderLocked { order_id: self.id });
        }
        Ok(())
    }

    fn line_index(&self, line_id: Uuid) -> Result<usize> {
        self.lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| LedgerError::not_found("order line", line_id))
    }

    fn commit_lines(&mut self, lines: Vec<OrderLine>) -> Result<()> {
        let (subtotal, vat_amount, total) = compute_totals(&lines, self.vat_rate)?;
        self.lines = lines;
        self.subtotal = subtotal;
        self.vat_amount = vat_amount;
        self.total = total;
        Ok(())
    }
}

/// Validate an input line and price it.
pub fn build_line(line_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
    if line.unit_price.is_negative() {
        return Err(LedgerError::invalid(
            "unit_price",
            format!("must be >= 0, got {}", line.unit_price),
        ));
    }
    if line.quantity.is_negative() {
        return Err(LedgerError::invalid(
            "quantity",
            format!("must be >= 0, got {}", line.quantity),
        ));
    }
    let line_total = line
        .quantity
        .checked_mul_price(line.unit_price)
        .ok_or(LedgerError::Overflow {
            field: "line_total",
        })?;
    Ok(OrderLine {
        id: line_id,
        label: line.label,
        unit_price: line.unit_price,
        quantity: line.quantity,
        line_total,
    })
}

/// Aggregate `(subtotal, vat_amount, total)` for a set of lines.
pub fn compute_totals(lines: &[OrderLine], vat_rate: VatRate) -> Result<(Micros, Micros, Micros)> {
    let mut subtotal = Micros::ZERO;
    for line in lines {
        let amount = priced(line.quantity, line.unit_price, "subtotal")?;
        subtotal = subtotal
            .checked_add(amount)
            .ok_or(LedgerError::Overflow { field: "subtotal" })?;
    }
    let vat_amount = vat_rate
        .checked_apply(subtotal)
        .ok_or(LedgerError::Overflow {
            field: "vat_amount",
        })?;
    let total = subtotal
        .checked_add(vat_amount)
        .ok_or(LedgerError::Overflow { field: "total" })?;
    Ok((subtotal, vat_amount, total))
}

fn priced(quantity: Qty, unit_price: Micros, field: &'static str) -> Result<Micros> {
    quantity
        .checked_mul_price(unit_price)
        .ok_or(LedgerError::Overflow { field })
}
