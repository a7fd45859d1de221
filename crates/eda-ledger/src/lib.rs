//! Progress-billing ledger core.
//!
//! Pure, deterministic domain logic: no IO, no clock. Stores (`MemLedger`
//! here, Postgres in `eda-db`) load state, call into these modules and
//! persist the result.

pub mod carry;
pub mod error;
pub mod finalize;
pub mod fixedpoint;
pub mod memory;
pub mod order;
pub mod reconcile;
pub mod sequencer;
mod statement;
pub mod types;

pub use error::{ErrorKind, LedgerError, Result};
pub use finalize::StatementState;
pub use fixedpoint::{Micros, ParseFixedError, Qty, VatRate, MICROS_SCALE, QTY_SCALE};
pub use memory::MemLedger;
pub use reconcile::{StatementSnapshot, StatementTotals, StatementVat, Totals, VatBreakdown};
pub use types::{
    ItemOrigin, LineLabel, NewAmendment, NewOrderLine, NewPhoto, NewStatement, Order, OrderLine,
    OrderStatus, Photo, ProgressItem, ProgressStatement, Scope,
};
