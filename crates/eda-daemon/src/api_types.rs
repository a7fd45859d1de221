//! Request and response types for all eda-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::{NaiveDate, Utc};
use eda_ledger::{NewOrderLine, NewStatement, Qty, Scope};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// "postgres" | "memory"
    pub backend: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable kind: PRECONDITION | IMMUTABLE_STATEMENT | CONFLICT |
    /// VALIDATION | NOT_FOUND | ORDER_LOCKED | INTERNAL
    pub kind: String,
    /// Only numbering races are worth resubmitting.
    pub retryable: bool,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub scope: Scope,
    /// Falls back to `ledger.default_vat_bps`.
    #[serde(default)]
    pub vat_bps: Option<i64>,
    #[serde(default)]
    pub lines: Vec<NewOrderLine>,
}

/// Result of an idempotent transition (lock, unlock, validate, reopen).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedResponse {
    pub id: Uuid,
    /// false when the target was already in the requested state.
    pub changed: bool,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStatementRequest {
    pub scope: Scope,
    /// Defaults to today (UTC).
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub period_label: Option<String>,
    #[serde(default)]
    pub client_statement_ref: Option<Uuid>,
}

impl CreateStatementRequest {
    pub fn new_statement(&self) -> NewStatement {
        NewStatement {
            date: self.date.unwrap_or_else(|| Utc::now().date_naive()),
            period_label: self.period_label.clone(),
            client_statement_ref: self.client_statement_ref,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetQuantityRequest {
    pub quantite_actuelle: Qty,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub period_label: Option<String>,
}

/// Query string selecting one ledger scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeQuery {
    pub chantier_id: Uuid,
    pub order_id: Uuid,
    #[serde(default)]
    pub subcontractor_id: Option<Uuid>,
}

impl ScopeQuery {
    pub fn scope(&self) -> Scope {
        Scope::from_parts(self.chantier_id, self.subcontractor_id, self.order_id)
    }
}
