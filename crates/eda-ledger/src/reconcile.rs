//! Reconciliation Aggregator: read-only totals over one statement.
//!
//! ```text
//! total_original   = Σ lines       {precedent, actuel, total}
//! total_amendments = Σ amendments  {precedent, actuel, total}
//! total_general    = total_original + total_amendments (element-wise)
//! ```
//!
//! Nothing here mutates a statement. [`snapshot`] packages a statement and
//! its totals into the view handed to reporting/PDF collaborators.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::finalize::StatementState;
use crate::fixedpoint::{Micros, VatRate};
use crate::types::{ProgressItem, ProgressStatement, Scope};

/// Period / previous / cumulative sums of a set of items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub precedent: Micros,
    pub actuel: Micros,
    pub total: Micros,
}

impl Totals {
    pub const ZERO: Totals = Totals {
        precedent: Micros::ZERO,
        actuel: Micros::ZERO,
        total: Micros::ZERO,
    };

    pub fn of<'a>(items: impl IntoIterator<Item = &'a ProgressItem>) -> Result<Totals> {
        items.into_iter().try_fold(Totals::ZERO, |acc, i| {
            acc.checked_add(Totals {
                precedent: i.montant_precedent,
                actuel: i.montant_actuel,
                total: i.montant_total,
            })
        })
    }

    pub fn checked_add(self, rhs: Totals) -> Result<Totals> {
        let overflow = || LedgerError::Overflow { field: "totals" };
        Ok(Totals {
            precedent: self
                .precedent
                .checked_add(rhs.precedent)
                .ok_or_else(overflow)?,
            actuel: self.actuel.checked_add(rhs.actuel).ok_or_else(overflow)?,
            total: self.total.checked_add(rhs.total).ok_or_else(overflow)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementTotals {
    pub total_original: Totals,
    pub total_amendments: Totals,
    pub total_general: Totals,
}

/// Sum lines and amendments of one statement.
pub fn aggregate(stmt: &ProgressStatement) -> Result<StatementTotals> {
    let total_original = Totals::of(&stmt.lines)?;
    let total_amendments = Totals::of(&stmt.amendments)?;
    let total_general = total_original.checked_add(total_amendments)?;
    Ok(StatementTotals {
        total_original,
        total_amendments,
        total_general,
    })
}

/// Excl. tax / VAT / incl. tax for one amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatBreakdown {
    pub ht: Micros,
    pub tva: Micros,
    pub ttc: Micros,
}

impl VatBreakdown {
    pub fn of(ht: Micros, rate: VatRate) -> Result<VatBreakdown> {
        let tva = rate
            .checked_apply(ht)
            .ok_or(LedgerError::Overflow { field: "tva" })?;
        let ttc = ht
            .checked_add(tva)
            .ok_or(LedgerError::Overflow { field: "ttc" })?;
        Ok(VatBreakdown { ht, tva, ttc })
    }
}

/// VAT figures for the statement's period and cumulative general totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementVat {
    pub vat_rate: VatRate,
    pub period: VatBreakdown,
    pub cumulative: VatBreakdown,
}

pub fn vat_figures(totals: &StatementTotals, rate: VatRate) -> Result<StatementVat> {
    Ok(StatementVat {
        vat_rate: rate,
        period: VatBreakdown::of(totals.total_general.actuel, rate)?,
        cumulative: VatBreakdown::of(totals.total_general.total, rate)?,
    })
}

/// Read-only view of a statement for reporting collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSnapshot {
    pub id: Uuid,
    pub scope: Scope,
    pub number: u32,
    pub date: NaiveDate,
    pub period_label: Option<String>,
    pub comments: Option<String>,
    pub finalized: bool,
    pub state: StatementState,
    pub client_statement_ref: Option<Uuid>,
    pub lines: Vec<ProgressItem>,
    pub amendments: Vec<ProgressItem>,
    pub totals: StatementTotals,
    pub vat: StatementVat,
}

/// Build the reporting snapshot of `stmt`, pricing VAT with the order's rate.
pub fn snapshot(stmt: &ProgressStatement, vat_rate: VatRate) -> Result<StatementSnapshot> {
    let totals = aggregate(stmt)?;
    let vat = vat_figures(&totals, vat_rate)?;
    Ok(StatementSnapshot {
        id: stmt.id,
        scope: stmt.scope,
        number: stmt.number,
        date: stmt.date,
        period_label: stmt.period_label.clone(),
        comments: stmt.comments.clone(),
        finalized: stmt.finalized,
        state: stmt.state(),
        client_statement_ref: stmt.client_statement_ref,
        lines: stmt.lines.clone(),
        amendments: stmt.amendments.clone(),
        totals,
        vat,
    })
}
