//! Storage seam behind the HTTP handlers.
//!
//! [`PgBackend`] is the production store; [`MemBackend`] serves the same
//! commands from an in-process [`MemLedger`] for tests and local demos.
//! Both return `anyhow::Error` whose root cause is the ledger rule violation,
//! so routes map failures the same way regardless of the store.

use anyhow::Result;
use eda_ledger::{
    MemLedger, NewAmendment, NewOrderLine, NewPhoto, NewStatement, Order, OrderLine, Photo,
    ProgressItem, ProgressStatement, Qty, Scope, StatementSnapshot, VatRate,
};
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

#[async_trait::async_trait]
pub trait LedgerBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_order(
        &self,
        scope: Scope,
        vat_rate: VatRate,
        lines: Vec<NewOrderLine>,
    ) -> Result<Order>;
    async fn fetch_order(&self, order_id: Uuid) -> Result<Order>;
    async fn add_order_line(&self, order_id: Uuid, line: NewOrderLine) -> Result<OrderLine>;
    async fn update_order_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        line: NewOrderLine,
    ) -> Result<OrderLine>;
    async fn remove_order_line(&self, order_id: Uuid, line_id: Uuid) -> Result<OrderLine>;
    async fn recompute_totals(&self, order_id: Uuid) -> Result<Order>;
    async fn lock_order(&self, order_id: Uuid) -> Result<bool>;
    async fn unlock_order(&self, order_id: Uuid) -> Result<bool>;

    async fn create_statement(&self, scope: Scope, new: NewStatement) -> Result<ProgressStatement>;
    async fn fetch_statement(&self, statement_id: Uuid) -> Result<ProgressStatement>;
    async fn list_statements(&self, scope: Scope) -> Result<Vec<ProgressStatement>>;
    async fn latest_statement(&self, scope: Scope) -> Result<Option<ProgressStatement>>;
    async fn set_current_quantity(
        &self,
        statement_id: Uuid,
        item_id: Uuid,
        quantite_actuelle: Qty,
    ) -> Result<ProgressItem>;
    async fn add_amendment(&self, statement_id: Uuid, input: NewAmendment) -> Result<ProgressItem>;
    async fn remove_amendment(&self, statement_id: Uuid, item_id: Uuid) -> Result<ProgressItem>;
    async fn validate_statement(
        &self,
        statement_id: Uuid,
        comments: Option<String>,
        period_label: Option<String>,
    ) -> Result<bool>;
    async fn reopen_statement(&self, statement_id: Uuid) -> Result<bool>;
    async fn delete_statement(&self, statement_id: Uuid) -> Result<ProgressStatement>;
    async fn attach_photo(&self, statement_id: Uuid, photo: NewPhoto) -> Result<Photo>;
    async fn list_photos(&self, statement_id: Uuid) -> Result<Vec<Photo>>;
    async fn snapshot(&self, statement_id: Uuid) -> Result<StatementSnapshot>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LedgerBackend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn create_order(
        &self,
        scope: Scope,
        vat_rate: VatRate,
        lines: Vec<NewOrderLine>,
    ) -> Result<Order> {
        eda_db::create_order(&self.pool, scope, vat_rate, lines).await
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order> {
        eda_db::fetch_order(&self.pool, order_id).await
    }

    async fn add_order_line(&self, order_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
        eda_db::add_order_line(&self.pool, order_id, line).await
    }

    async fn update_order_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        line: NewOrderLine,
    ) -> Result<OrderLine> {
        eda_db::update_order_line(&self.pool, order_id, line_id, line).await
    }

    async fn remove_order_line(&self, order_id: Uuid, line_id: Uuid) -> Result<OrderLine> {
        eda_db::remove_order_line(&self.pool, order_id, line_id).await
    }

    async fn recompute_totals(&self, order_id: Uuid) -> Result<Order> {
        eda_db::recompute_totals(&self.pool, order_id).await
    }

    async fn lock_order(&self, order_id: Uuid) -> Result<bool> {
        eda_db::lock_order(&self.pool, order_id).await
    }

    async fn unlock_order(&self, order_id: Uuid) -> Result<bool> {
        eda_db::unlock_order(&self.pool, order_id).await
    }

    async fn create_statement(&self, scope: Scope, new: NewStatement) -> Result<ProgressStatement> {
        eda_db::create_statement(&self.pool, scope, new).await
    }

    async fn fetch_statement(&self, statement_id: Uuid) -> Result<ProgressStatement> {
        eda_db::fetch_statement(&self.pool, statement_id).await
    }

    async fn list_statements(&self, scope: Scope) -> Result<Vec<ProgressStatement>> {
        eda_db::list_statements(&self.pool, &scope).await
    }

    async fn latest_statement(&self, scope: Scope) -> Result<Option<ProgressStatement>> {
        eda_db::latest_statement(&self.pool, &scope).await
    }

    async fn set_current_quantity(
        &self,
        statement_id: Uuid,
        item_id: Uuid,
        quantite_actuelle: Qty,
    ) -> Result<ProgressItem> {
        eda_db::set_current_quantity(&self.pool, statement_id, item_id, quantite_actuelle).await
    }

    async fn add_amendment(&self, statement_id: Uuid, input: NewAmendment) -> Result<ProgressItem> {
        eda_db::add_amendment(&self.pool, statement_id, input).await
    }

    async fn remove_amendment(&self, statement_id: Uuid, item_id: Uuid) -> Result<ProgressItem> {
        eda_db::remove_amendment(&self.pool, statement_id, item_id).await
    }

    async fn validate_statement(
        &self,
        statement_id: Uuid,
        comments: Option<String>,
        period_label: Option<String>,
    ) -> Result<bool> {
        eda_db::validate_statement(&self.pool, statement_id, comments, period_label).await
    }

    async fn reopen_statement(&self, statement_id: Uuid) -> Result<bool> {
        eda_db::reopen_statement(&self.pool, statement_id).await
    }

    async fn delete_statement(&self, statement_id: Uuid) -> Result<ProgressStatement> {
        eda_db::delete_statement(&self.pool, statement_id).await
    }

    async fn attach_photo(&self, statement_id: Uuid, photo: NewPhoto) -> Result<Photo> {
        eda_db::attach_photo(&self.pool, statement_id, photo).await
    }

    async fn list_photos(&self, statement_id: Uuid) -> Result<Vec<Photo>> {
        eda_db::list_photos(&self.pool, statement_id).await
    }

    async fn snapshot(&self, statement_id: Uuid) -> Result<StatementSnapshot> {
        eda_db::snapshot(&self.pool, statement_id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemBackend {
    ledger: Mutex<MemLedger>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerBackend for MemBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_order(
        &self,
        scope: Scope,
        vat_rate: VatRate,
        lines: Vec<NewOrderLine>,
    ) -> Result<Order> {
        Ok(self.ledger.lock().await.create_order(scope, vat_rate, lines)?)
    }

    async fn fetch_order(&self, order_id: Uuid) -> Result<Order> {
        Ok(self.ledger.lock().await.order(order_id)?.clone())
    }

    async fn add_order_line(&self, order_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
        Ok(self.ledger.lock().await.add_order_line(order_id, line)?)
    }

    async fn update_order_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        line: NewOrderLine,
    ) -> Result<OrderLine> {
        Ok(self
            .ledger
            .lock()
            .await
            .update_order_line(order_id, line_id, line)?)
    }

    async fn remove_order_line(&self, order_id: Uuid, line_id: Uuid) -> Result<OrderLine> {
        Ok(self.ledger.lock().await.remove_order_line(order_id, line_id)?)
    }

    async fn recompute_totals(&self, order_id: Uuid) -> Result<Order> {
        Ok(self.ledger.lock().await.recompute_totals(order_id)?)
    }

    async fn lock_order(&self, order_id: Uuid) -> Result<bool> {
        Ok(self.ledger.lock().await.lock_order(order_id)?)
    }

    async fn unlock_order(&self, order_id: Uuid) -> Result<bool> {
        Ok(self.ledger.lock().await.unlock_order(order_id)?)
    }

    async fn create_statement(&self, scope: Scope, new: NewStatement) -> Result<ProgressStatement> {
        Ok(self.ledger.lock().await.create_statement(scope, new)?)
    }

    async fn fetch_statement(&self, statement_id: Uuid) -> Result<ProgressStatement> {
        Ok(self.ledger.lock().await.statement(statement_id)?.clone())
    }

    async fn list_statements(&self, scope: Scope) -> Result<Vec<ProgressStatement>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.statements(&scope).into_iter().cloned().collect())
    }

    async fn latest_statement(&self, scope: Scope) -> Result<Option<ProgressStatement>> {
        Ok(self.ledger.lock().await.latest_statement(&scope).cloned())
    }

    async fn set_current_quantity(
        &self,
        statement_id: Uuid,
        item_id: Uuid,
        quantite_actuelle: Qty,
    ) -> Result<ProgressItem> {
        Ok(self
            .ledger
            .lock()
            .await
            .set_current_quantity(statement_id, item_id, quantite_actuelle)?)
    }

    async fn add_amendment(&self, statement_id: Uuid, input: NewAmendment) -> Result<ProgressItem> {
        Ok(self.ledger.lock().await.add_amendment(statement_id, input)?)
    }

    async fn remove_amendment(&self, statement_id: Uuid, item_id: Uuid) -> Result<ProgressItem> {
        Ok(self
            .ledger
            .lock()
            .await
            .remove_amendment(statement_id, item_id)?)
    }

    async fn validate_statement(
        &self,
        statement_id: Uuid,
        comments: Option<String>,
        period_label: Option<String>,
    ) -> Result<bool> {
        Ok(self
            .ledger
            .lock()
            .await
            .validate_statement(statement_id, comments, period_label)?)
    }

    async fn reopen_statement(&self, statement_id: Uuid) -> Result<bool> {
        Ok(self.ledger.lock().await.reopen_statement(statement_id)?)
    }

    async fn delete_statement(&self, statement_id: Uuid) -> Result<ProgressStatement> {
        Ok(self.ledger.lock().await.delete_statement(statement_id)?)
    }

    async fn attach_photo(&self, statement_id: Uuid, photo: NewPhoto) -> Result<Photo> {
        Ok(self.ledger.lock().await.attach_photo(statement_id, photo)?)
    }

    async fn list_photos(&self, statement_id: Uuid) -> Result<Vec<Photo>> {
        let ledger = self.ledger.lock().await;
        Ok(ledger.photos(statement_id)?.into_iter().cloned().collect())
    }

    async fn snapshot(&self, statement_id: Uuid) -> Result<StatementSnapshot> {
        Ok(self.ledger.lock().await.snapshot(statement_id)?)
    }
}
