//! Ledger error taxonomy.
//!
//! Every rejected command maps to exactly one [`ErrorKind`]. The kind strings
//! are stable: the HTTP daemon and the CLI surface them verbatim, and a caller
//! may branch on them (only [`ErrorKind::Conflict`] from a numbering race is
//! safe to retry).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::fixedpoint::Qty;

/// Stable classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A gating rule refused the command (order not locked, previous
    /// statement still draft, empty first statement...).
    Precondition,
    /// The target statement is finalized.
    ImmutableStatement,
    /// Reopening a non-latest statement, or a duplicate number from a race.
    Conflict,
    /// Negative, malformed or out-of-range input.
    Validation,
    /// Missing order, statement, item or scope.
    NotFound,
    /// The order is locked and its lines cannot change.
    OrderLocked,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "PRECONDITION",
            ErrorKind::ImmutableStatement => "IMMUTABLE_STATEMENT",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::OrderLocked => "ORDER_LOCKED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All rule violations the ledger can surface. The ledger is never mutated
/// when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("order not locked (scope={scope}, order_id={order_id})")]
    OrderNotLocked { scope: String, order_id: Uuid },

    #[error("previous statement not finalized (scope={scope}, number={number})")]
    PreviousNotFinalized { scope: String, number: u32 },

    #[error("first statement of a scope needs at least one item with progress (statement_id={statement_id})")]
    EmptyFirstStatement { statement_id: Uuid },

    #[error("amendment carries earlier progress and cannot be removed (statement_id={statement_id}, item_id={item_id})")]
    CarriedAmendment { statement_id: Uuid, item_id: Uuid },

    #[error("statement is finalized (statement_id={statement_id})")]
    ImmutableStatement { statement_id: Uuid },

    #[error("not the latest statement (statement_id={statement_id}, number={number}, latest={latest})")]
    NotLatest {
        statement_id: Uuid,
        number: u32,
        latest: u32,
    },

    #[error("statement number already taken (scope={scope}, number={number})")]
    DuplicateNumber { scope: String, number: u32 },

    #[error("order is locked (order_id={order_id})")]
    OrderLocked { order_id: Uuid },

    #[error("quantite_actuelle must be >= 0 (item_id={item_id}, value={value})")]
    NegativeQuantity { item_id: Uuid, value: Qty },

    #[error("quantite_actuelle {requested} exceeds remaining contracted quantity {remaining} (item_id={item_id})")]
    ExceedsContract {
        item_id: Uuid,
        requested: Qty,
        remaining: Qty,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("arithmetic overflow computing {field}")]
    Overflow { field: &'static str },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::OrderNotLocked { .. }
            | LedgerError::PreviousNotFinalized { .. }
            | LedgerError::EmptyFirstStatement { .. }
            | LedgerError::CarriedAmendment { .. } => ErrorKind::Precondition,
            LedgerError::ImmutableStatement { .. } => ErrorKind::ImmutableStatement,
            LedgerError::NotLatest { .. } | LedgerError::DuplicateNumber { .. } => {
                ErrorKind::Conflict
            }
            LedgerError::OrderLocked { .. } => ErrorKind::OrderLocked,
            LedgerError::NegativeQuantity { .. }
            | LedgerError::ExceedsContract { .. }
            | LedgerError::Invalid { .. }
            | LedgerError::Overflow { .. } => ErrorKind::Validation,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Only a numbering race may be retried: re-read the latest statement,
    /// recompute the number and resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::DuplicateNumber { .. })
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
