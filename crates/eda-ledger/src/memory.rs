//! In-memory ledger store.
//!
//! Runs every ledger command against `BTreeMap`s with the same rules the
//! Postgres store applies. Used by tests and by the daemon when no database
//! is configured.
//!
//! Design decisions:
//! - Ids are derived deterministically (UUIDv5 over a per-store sequence), so
//!   a replay of the same commands yields the same ids.
//! - A command either fully applies or leaves the store untouched.
//! - No clock: dates and photo timestamps come from the caller.

use std::collections::BTreeMap;

use tracing::{info, warn};
use uuid::Uuid;

use crate::carry;
use crate::error::{LedgerError, Result};
use crate::finalize;
use crate::fixedpoint::{Qty, VatRate};
use crate::reconcile::{self, StatementSnapshot};
use crate::sequencer;
use crate::types::{
    NewAmendment, NewOrderLine, NewPhoto, NewStatement, Order, OrderLine, Photo, ProgressItem,
    ProgressStatement, Scope,
};

const ID_NAMESPACE: Uuid = Uuid::from_u128(0x6564_612d_6c65_6467_6572_2d6d_656d_0001);

#[derive(Clone, Debug, Default)]
pub struct MemLedger {
    orders: BTreeMap<Uuid, Order>,
    statements: BTreeMap<Uuid, ProgressStatement>,
    photos: BTreeMap<Uuid, Photo>,
    seq: u64,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> Uuid {
        self.seq += 1;
        Uuid::new_v5(&ID_NAMESPACE, format!("eda:mem:{}", self.seq).as_bytes())
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Create an unlocked draft order for `scope` with the given lines.
    pub fn create_order(
        &mut self,
        scope: Scope,
        vat_rate: VatRate,
        lines: Vec<NewOrderLine>,
    ) -> Result<Order> {
        let order_id = scope.order_id();
        if self.orders.contains_key(&order_id) {
            return Err(LedgerError::invalid(
                "order",
                format!("order {order_id} already exists"),
            ));
        }
        let mut order = Order::new(order_id, scope, vat_rate)?;
        for line in lines {
            let id = self.next_id();
            order.add_line(id, line)?;
        }
        info!(%scope, %order_id, lines = order.lines.len(), total = %order.total, "order created");
        self.orders.insert(order_id, order.clone());
        Ok(order)
    }

    pub fn order(&self, order_id: Uuid) -> Result<&Order> {
        self.orders
            .get(&order_id)
            .ok_or_else(|| LedgerError::not_found("order", order_id))
    }

    fn order_mut(&mut self, order_id: Uuid) -> Result<&mut Order> {
        self.orders
            .get_mut(&order_id)
            .ok_or_else(|| LedgerError::not_found("order", order_id))
    }

    pub fn add_order_line(&mut self, order_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
        self.order(order_id)?;
        let line_id = self.next_id();
        self.order_mut(order_id)?.add_line(line_id, line)
    }

    pub fn update_order_line(
        &mut self,
        order_id: Uuid,
        line_id: Uuid,
        line: NewOrderLine,
    ) -> Result<OrderLine> {
        self.order_mut(order_id)?.update_line(line_id, line)
    }

    pub fn remove_order_line(&mut self, order_id: Uuid, line_id: Uuid) -> Result<OrderLine> {
        self.order_mut(order_id)?.remove_line(line_id)
    }

    pub fn recompute_totals(&mut self, order_id: Uuid) -> Result<Order> {
        let order = self.order_mut(order_id)?;
        order.recompute_totals()?;
        Ok(order.clone())
    }

    /// Idempotent. Returns `true` when the order was not yet locked.
    pub fn lock_order(&mut self, order_id: Uuid) -> Result<bool> {
        let order = self.order_mut(order_id)?;
        let changed = order.lock();
        if changed {
            info!(%order_id, "order locked");
        }
        Ok(changed)
    }

    /// Unconditional. Statements already created stay as they are.
    pub fn unlock_order(&mut self, order_id: Uuid) -> Result<bool> {
        let scope = self.order(order_id)?.scope;
        let existing = self.statements.values().filter(|s| s.scope == scope).count();
        let order = self.order_mut(order_id)?;
        let changed = order.unlock();
        if changed {
            if existing > 0 {
                warn!(%order_id, %scope, statements = existing, "order unlocked with existing statements");
            } else {
                info!(%order_id, "order unlocked");
            }
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    /// Create the next draft statement of `scope`.
    pub fn create_statement(&mut self, scope: Scope, new: NewStatement) -> Result<ProgressStatement> {
        let order = self.order(scope.order_id())?.clone();
        let latest = self.latest_statement(&scope).cloned();

        let mut seq = self.seq;
        let stmt = sequencer::plan_statement(&scope, &order, latest.as_ref(), new, || {
            seq += 1;
            Uuid::new_v5(&ID_NAMESPACE, format!("eda:mem:{seq}").as_bytes())
        })?;
        if self
            .statements(&scope)
            .iter()
            .any(|s| s.number == stmt.number)
        {
            return Err(LedgerError::DuplicateNumber {
                scope: scope.key(),
                number: stmt.number,
            });
        }
        self.seq = seq;
        self.statements.insert(stmt.id, stmt.clone());
        Ok(stmt)
    }

    pub fn statement(&self, statement_id: Uuid) -> Result<&ProgressStatement> {
        self.statements
            .get(&statement_id)
            .ok_or_else(|| LedgerError::not_found("statement", statement_id))
    }

    fn statement_mut(&mut self, statement_id: Uuid) -> Result<&mut ProgressStatement> {
        self.statements
            .get_mut(&statement_id)
            .ok_or_else(|| LedgerError::not_found("statement", statement_id))
    }

    /// All statements of `scope`, by ascending number.
    pub fn statements(&self, scope: &Scope) -> Vec<&ProgressStatement> {
        let mut out: Vec<_> = self
            .statements
            .values()
            .filter(|s| s.scope == *scope)
            .collect();
        out.sort_by_key(|s| s.number);
        out
    }

    pub fn latest_statement(&self, scope: &Scope) -> Option<&ProgressStatement> {
        self.statements
            .values()
            .filter(|s| s.scope == *scope)
            .max_by_key(|s| s.number)
    }

    pub fn set_current_quantity(
        &mut self,
        statement_id: Uuid,
        item_id: Uuid,
        quantite_actuelle: Qty,
    ) -> Result<ProgressItem> {
        carry::set_current_quantity(self.statement_mut(statement_id)?, item_id, quantite_actuelle)
    }

    pub fn add_amendment(&mut self, statement_id: Uuid, input: NewAmendment) -> Result<ProgressItem> {
        self.statement(statement_id)?.ensure_draft()?;
        let item_id = self.next_id();
        self.statement_mut(statement_id)?.add_amendment(item_id, input)
    }

    pub fn remove_amendment(&mut self, statement_id: Uuid, item_id: Uuid) -> Result<ProgressItem> {
        self.statement_mut(statement_id)?.remove_amendment(item_id)
    }

    pub fn validate_statement(
        &mut self,
        statement_id: Uuid,
        comments: Option<String>,
        period_label: Option<String>,
    ) -> Result<bool> {
        let stmt = self.statement_mut(statement_id)?;
        let changed = finalize::validate(stmt, comments, period_label)?;
        if changed {
            info!(%statement_id, scope = %stmt.scope, number = stmt.number, "statement finalized");
        }
        Ok(changed)
    }

    pub fn reopen_statement(&mut self, statement_id: Uuid) -> Result<bool> {
        let scope = self.statement(statement_id)?.scope;
        let latest = self
            .latest_statement(&scope)
            .map(|s| s.number)
            .unwrap_or(0);
        let stmt = self.statement_mut(statement_id)?;
        let changed = finalize::reopen(stmt, latest)?;
        if changed {
            info!(%statement_id, %scope, number = stmt.number, "statement reopened");
        }
        Ok(changed)
    }

    /// Remove a draft statement with its items and photos.
    pub fn delete_statement(&mut self, statement_id: Uuid) -> Result<ProgressStatement> {
        finalize::ensure_deletable(self.statement(statement_id)?)?;
        let removed = self
            .statements
            .remove(&statement_id)
            .ok_or_else(|| LedgerError::not_found("statement", statement_id))?;
        self.photos.retain(|_, p| p.statement_id != statement_id);
        info!(%statement_id, scope = %removed.scope, number = removed.number, "statement deleted");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Photos
    // -----------------------------------------------------------------------

    pub fn attach_photo(&mut self, statement_id: Uuid, photo: NewPhoto) -> Result<Photo> {
        self.statement(statement_id)?;
        if photo.storage_key.trim().is_empty() {
            return Err(LedgerError::invalid("storage_key", "must not be empty"));
        }
        let photo = Photo {
            id: self.next_id(),
            statement_id,
            storage_key: photo.storage_key,
            description: photo.description,
            taken_at: photo.taken_at,
        };
        self.photos.insert(photo.id, photo.clone());
        Ok(photo)
    }

    /// Photos of a statement, oldest first.
    pub fn photos(&self, statement_id: Uuid) -> Result<Vec<&Photo>> {
        self.statement(statement_id)?;
        let mut out: Vec<_> = self
            .photos
            .values()
            .filter(|p| p.statement_id == statement_id)
            .collect();
        out.sort_by_key(|p| (p.taken_at, p.id));
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, statement_id: Uuid) -> Result<StatementSnapshot> {
        let stmt = self.statement(statement_id)?;
        let order = self.order(stmt.scope.order_id())?;
        reconcile::snapshot(stmt, order.vat_rate)
    }
}
