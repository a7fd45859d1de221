use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::fixedpoint::{Micros, Qty, VatRate};

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The contract a ledger instance is keyed by.
///
/// The client side bills the chantier's own order ("Commande"); each
/// subcontractor runs a mirror ledger keyed by its own order
/// ("CommandeSousTraitant"). Numbering, gating and carry-forward are
/// independent per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum Scope {
    Client {
        chantier_id: Uuid,
        order_id: Uuid,
    },
    Subcontractor {
        chantier_id: Uuid,
        subcontractor_id: Uuid,
        order_id: Uuid,
    },
}

impl Scope {
    pub fn client(chantier_id: Uuid, order_id: Uuid) -> Self {
        Scope::Client {
            chantier_id,
            order_id,
        }
    }

    pub fn subcontractor(chantier_id: Uuid, subcontractor_id: Uuid, order_id: Uuid) -> Self {
        Scope::Subcontractor {
            chantier_id,
            subcontractor_id,
            order_id,
        }
    }

    /// Rebuild a scope from its stored columns.
    pub fn from_parts(chantier_id: Uuid, subcontractor_id: Option<Uuid>, order_id: Uuid) -> Self {
        match subcontractor_id {
            Some(subcontractor_id) => Scope::subcontractor(chantier_id, subcontractor_id, order_id),
            None => Scope::client(chantier_id, order_id),
        }
    }

    pub fn chantier_id(&self) -> Uuid {
        match self {
            Scope::Client { chantier_id, .. } | Scope::Subcontractor { chantier_id, .. } => {
                *chantier_id
            }
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Scope::Client { order_id, .. } | Scope::Subcontractor { order_id, .. } => *order_id,
        }
    }

    pub fn subcontractor_id(&self) -> Option<Uuid> {
        match self {
            Scope::Client { .. } => None,
            Scope::Subcontractor {
                subcontractor_id, ..
            } => Some(*subcontractor_id),
        }
    }

    pub fn is_subcontractor(&self) -> bool {
        matches!(self, Scope::Subcontractor { .. })
    }

    /// Canonical string key, used for logging, storage uniqueness and
    /// per-scope locking.
    pub fn key(&self) -> String {
        match self {
            Scope::Client {
                chantier_id,
                order_id,
            } => format!("client:{chantier_id}:{order_id}"),
            Scope::Subcontractor {
                chantier_id,
                subcontractor_id,
                order_id,
            } => format!("sub:{chantier_id}:{subcontractor_id}:{order_id}"),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Draft,
    Validated,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "DRAFT",
            OrderStatus::Validated => "VALIDATED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "DRAFT" => Ok(OrderStatus::Draft),
            "VALIDATED" => Ok(OrderStatus::Validated),
            other => Err(LedgerError::invalid(
                "order status",
                format!("unknown status {other:?}"),
            )),
        }
    }
}

/// Descriptive fields shared by order lines and the progress items copied
/// from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineLabel {
    pub article: String,
    pub description: String,
    #[serde(rename = "type")]
    pub line_type: String,
    pub unit: String,
}

/// A priced line of the originating order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: Uuid,
    #[serde(flatten)]
    pub label: LineLabel,
    pub unit_price: Micros,
    pub quantity: Qty,
    pub line_total: Micros,
}

/// Input for adding or replacing an order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    #[serde(flatten)]
    pub label: LineLabel,
    pub unit_price: Micros,
    pub quantity: Qty,
}

/// The contract's priced order. Lines are mutable only while unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub scope: Scope,
    pub lines: Vec<OrderLine>,
    pub subtotal: Micros,
    pub vat_rate: VatRate,
    pub vat_amount: Micros,
    pub total: Micros,
    pub locked: bool,
    pub status: OrderStatus,
}

// ---------------------------------------------------------------------------
// Progress statements
// ---------------------------------------------------------------------------

/// Where a progress item comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Bound to a line of the originating order.
    OrderLine { order_line_id: Uuid },
    /// Ad hoc extra work ("avenant"), not tied to the order.
    Amendment,
}

/// One billed row of a statement: a ProgressLine when its origin is an
/// order line, a ProgressAmendment otherwise. Both share the same shape and
/// the same carry-forward arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressItem {
    pub id: Uuid,
    pub origin: ItemOrigin,
    #[serde(flatten)]
    pub label: LineLabel,
    pub unit_price: Micros,
    /// Contracted quantity (zero for amendments).
    pub quantity: Qty,
    pub quantite_precedente: Qty,
    pub quantite_actuelle: Qty,
    pub quantite_totale: Qty,
    pub montant_precedent: Micros,
    pub montant_actuel: Micros,
    pub montant_total: Micros,
    /// Set when the item was carried from the previous statement.
    #[serde(default)]
    pub carried: bool,
}

impl ProgressItem {
    pub fn is_amendment(&self) -> bool {
        matches!(self.origin, ItemOrigin::Amendment)
    }

    pub fn order_line_id(&self) -> Option<Uuid> {
        match self.origin {
            ItemOrigin::OrderLine { order_line_id } => Some(order_line_id),
            ItemOrigin::Amendment => None,
        }
    }

    /// `true` when the item was introduced by its own statement rather
    /// than carried from an earlier one, whatever its amounts.
    pub fn is_fresh(&self) -> bool {
        !self.carried
    }
}

/// A dated, numbered cumulative billing snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStatement {
    pub id: Uuid,
    pub scope: Scope,
    pub number: u32,
    pub date: NaiveDate,
    pub period_label: Option<String>,
    pub comments: Option<String>,
    pub finalized: bool,
    /// Subcontractor mirrors only: the client-side statement current when
    /// this one was created. Traceability only.
    pub client_statement_ref: Option<Uuid>,
    pub lines: Vec<ProgressItem>,
    pub amendments: Vec<ProgressItem>,
}

/// Input for `create_statement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStatement {
    pub date: NaiveDate,
    #[serde(default)]
    pub period_label: Option<String>,
    #[serde(default)]
    pub client_statement_ref: Option<Uuid>,
}

impl NewStatement {
    pub fn dated(date: NaiveDate) -> Self {
        Self {
            date,
            period_label: None,
            client_statement_ref: None,
        }
    }
}

/// Input for adding an amendment to a draft statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAmendment {
    #[serde(flatten)]
    pub label: LineLabel,
    pub unit_price: Micros,
}

// ---------------------------------------------------------------------------
// Photos
// ---------------------------------------------------------------------------

/// Reference to a photo held by the external file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub statement_id: Uuid,
    pub storage_key: String,
    pub description: Option<String>,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub storage_key: String,
    #[serde(default)]
    pub description: Option<String>,
    pub taken_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_keys_distinguish_sides() {
        let chantier = Uuid::from_u128(1);
        let order = Uuid::from_u128(2);
        let sub = Uuid::from_u128(3);

        let client = Scope::client(chantier, order);
        let mirror = Scope::subcontractor(chantier, sub, order);
        assert_ne!(client.key(), mirror.key());
        assert!(client.key().starts_with("client:"));
        assert!(mirror.key().starts_with("sub:"));
        assert_eq!(Scope::from_parts(chantier, Some(sub), order), mirror);
        assert_eq!(Scope::from_parts(chantier, None, order), client);
        assert_eq!(mirror.subcontractor_id(), Some(sub));
    }

    #[test]
    fn order_line_serializes_type_field() {
        let line = NewOrderLine {
            label: LineLabel {
                article: "1.1".to_string(),
                description: "Terrassement".to_string(),
                line_type: "FOURNITURE".to_string(),
                unit: "m3".to_string(),
            },
            unit_price: Micros::new(10_000_000),
            quantity: Qty::new(100_000),
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["type"], "FOURNITURE");
        assert_eq!(json["unit_price"], 10_000_000);
    }
}
