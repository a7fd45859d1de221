//! Finalization State Machine.
//!
//! # States
//!
//! ```text
//!             validate                      reopen (latest only)
//!   Draft ──────────────────► Finalized ──────────────────────► Draft
//!     │
//!     └── delete (Draft only)
//! ```
//!
//! Every transition is checked here, inside the command, so no caller can
//! reopen a statement that later statements already build on, or delete one
//! whose totals were carried forward.
//!
//! # Idempotency
//!
//! `validate` on an already finalized statement and `reopen` on a draft are
//! no-ops returning `Ok(false)`, so a retried command converges.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};
use crate::types::ProgressStatement;

/// Lifecycle state of a progress statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementState {
    /// Editable: quantities and amendments may change.
    Draft,
    /// Frozen. Later statements may carry from it.
    Finalized,
}

impl StatementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementState::Draft => "DRAFT",
            StatementState::Finalized => "FINALIZED",
        }
    }
}

impl ProgressStatement {
    pub fn state(&self) -> StatementState {
        if self.finalized {
            StatementState::Finalized
        } else {
            StatementState::Draft
        }
    }
}

/// Draft → Finalized.
///
/// `comments` replaces the stored comments; `period_label` replaces the
/// stored label when given. The first statement of a scope must bill
/// something: at least one line or amendment with `quantite_actuelle > 0`.
///
/// Returns `true` if the state changed.
pub fn validate(
    stmt: &mut ProgressStatement,
    comments: Option<String>,
    period_label: Option<String>,
) -> Result<bool> {
    if stmt.finalized {
        return Ok(false);
    }
    if stmt.number == 1 && !stmt.has_current_progress() {
        return Err(LedgerError::EmptyFirstStatement {
            statement_id: stmt.id,
        });
    }
    stmt.comments = comments;
    if period_label.is_some() {
        stmt.period_label = period_label;
    }
    stmt.finalized = true;
    Ok(true)
}

/// Finalized → Draft, only for the latest statement of its scope.
///
/// `latest_number` is the highest number currently stored for the scope.
pub fn reopen(stmt: &mut ProgressStatement, latest_number: u32) -> Result<bool> {
    if latest_number > stmt.number {
        return Err(LedgerError::NotLatest {
            statement_id: stmt.id,
            number: stmt.number,
            latest: latest_number,
        });
    }
    if !stmt.finalized {
        return Ok(false);
    }
    stmt.finalized = false;
    Ok(true)
}

/// Deletion is allowed only while Draft.
pub fn ensure_deletable(stmt: &ProgressStatement) -> Result<()> {
    stmt.ensure_draft()
}

/// Quantity and amendment edits require Draft. Photos are not gated.
pub fn ensure_mutable(stmt: &ProgressStatement) -> Result<()> {
    stmt.ensure_draft()
}
