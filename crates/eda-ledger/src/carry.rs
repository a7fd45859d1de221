//! Carry-Forward Calculator.
//!
//! Pure arithmetic over one progress item:
//!
//! ```text
//! quantite_totale = quantite_precedente + quantite_actuelle
//! montant_actuel  = quantite_actuelle × unit_price      (rounded to the micro)
//! montant_total   = montant_precedent + montant_actuel
//! ```
//!
//! and the two constructors that start an item's life in a statement:
//! [`seed_line`] (first statement, from the order) and [`carry_item`]
//! (statement k+1, from statement k).

use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::fixedpoint::{Micros, Qty};
use crate::types::{ItemOrigin, NewAmendment, OrderLine, ProgressItem, ProgressStatement};

/// The three derived fields of a progress item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub quantite_totale: Qty,
    pub montant_actuel: Micros,
    pub montant_total: Micros,
}

/// Compute the derived fields from the stored inputs. Same inputs, same
/// outputs; no state is read or written.
pub fn compute(
    quantite_precedente: Qty,
    montant_precedent: Micros,
    quantite_actuelle: Qty,
    unit_price: Micros,
) -> Result<Derived> {
    let quantite_totale = quantite_precedente
        .checked_add(quantite_actuelle)
        .ok_or(LedgerError::Overflow {
            field: "quantite_totale",
        })?;
    let montant_actuel = quantite_actuelle
        .checked_mul_price(unit_price)
        .ok_or(LedgerError::Overflow {
            field: "montant_actuel",
        })?;
    let montant_total = montant_precedent
        .checked_add(montant_actuel)
        .ok_or(LedgerError::Overflow {
            field: "montant_total",
        })?;
    Ok(Derived {
        quantite_totale,
        montant_actuel,
        montant_total,
    })
}

/// Re-derive an item's totals from its precedent/actuel fields in place.
pub fn recompute(item: &mut ProgressItem) -> Result<()> {
    let d = compute(
        item.quantite_precedente,
        item.montant_precedent,
        item.quantite_actuelle,
        item.unit_price,
    )?;
    item.quantite_totale = d.quantite_totale;
    item.montant_actuel = d.montant_actuel;
    item.montant_total = d.montant_total;
    Ok(())
}

/// `true` when the item's stored derived fields match a fresh [`compute`].
pub fn is_consistent(item: &ProgressItem) -> bool {
    match compute(
        item.quantite_precedente,
        item.montant_precedent,
        item.quantite_actuelle,
        item.unit_price,
    ) {
        Ok(d) => {
            d.quantite_totale == item.quantite_totale
                && d.montant_actuel == item.montant_actuel
                && d.montant_total == item.montant_total
        }
        Err(_) => false,
    }
}

/// Set the current-period quantity of one line or amendment of a draft
/// statement and re-derive its totals.
///
/// Order lines may not bill beyond their contracted quantity
/// (`quantite_precedente + quantite_actuelle <= quantity`); amendments have
/// no ceiling.
///
/// # Errors
/// - [`LedgerError::ImmutableStatement`] if the statement is finalized.
/// - [`LedgerError::NegativeQuantity`] / [`LedgerError::ExceedsContract`].
/// - [`LedgerError::NotFound`] if the item is not in this statement.
pub fn set_current_quantity(
    stmt: &mut ProgressStatement,
    item_id: Uuid,
    quantite_actuelle: Qty,
) -> Result<ProgressItem> {
    if stmt.finalized {
        return Err(LedgerError::ImmutableStatement {
            statement_id: stmt.id,
        });
    }
    if quantite_actuelle.is_negative() {
        return Err(LedgerError::NegativeQuantity {
            item_id,
            value: quantite_actuelle,
        });
    }

    let statement_id = stmt.id;
    let item = stmt
        .item_mut(item_id)
        .ok_or_else(|| LedgerError::not_found("progress item", item_id))?;

    if !item.is_amendment() {
        let remaining = item
            .quantity
            .checked_sub(item.quantite_precedente)
            .ok_or(LedgerError::Overflow {
                field: "remaining quantity",
            })?;
        if quantite_actuelle > remaining {
            return Err(LedgerError::ExceedsContract {
                item_id,
                requested: quantite_actuelle,
                remaining,
            });
        }
    }

    let d = compute(
        item.quantite_precedente,
        item.montant_precedent,
        quantite_actuelle,
        item.unit_price,
    )?;
    item.quantite_actuelle = quantite_actuelle;
    item.quantite_totale = d.quantite_totale;
    item.montant_actuel = d.montant_actuel;
    item.montant_total = d.montant_total;

    tracing::debug!(
        %statement_id,
        %item_id,
        quantite_actuelle = %quantite_actuelle,
        montant_actuel = %d.montant_actuel,
        "current quantity set"
    );
    Ok(item.clone())
}

/// First-statement progress line seeded from an order line: descriptive
/// fields and price copied, all six quantity/amount fields zero.
pub fn seed_line(id: Uuid, line: &OrderLine) -> ProgressItem {
    ProgressItem {
        id,
        origin: ItemOrigin::OrderLine {
            order_line_id: line.id,
        },
        label: line.label.clone(),
        unit_price: line.unit_price,
        quantity: line.quantity,
        quantite_precedente: Qty::ZERO,
        quantite_actuelle: Qty::ZERO,
        quantite_totale: Qty::ZERO,
        montant_precedent: Micros::ZERO,
        montant_actuel: Micros::ZERO,
        montant_total: Micros::ZERO,
        carried: false,
    }
}

/// Clone an item of statement k into statement k+1: the previous totals
/// become the new precedents and the current period restarts at zero.
pub fn carry_item(id: Uuid, prev: &ProgressItem) -> ProgressItem {
    ProgressItem {
        id,
        origin: prev.origin,
        label: prev.label.clone(),
        unit_price: prev.unit_price,
        quantity: prev.quantity,
        quantite_precedente: prev.quantite_totale,
        quantite_actuelle: Qty::ZERO,
        quantite_totale: prev.quantite_totale,
        montant_precedent: prev.montant_total,
        montant_actuel: Micros::ZERO,
        montant_total: prev.montant_total,
        carried: true,
    }
}

/// A fresh zero-quantity amendment.
pub fn new_amendment(id: Uuid, input: NewAmendment) -> Result<ProgressItem> {
    if input.unit_price.is_negative() {
        return Err(LedgerError::invalid(
            "unit_price",
            format!("must be >= 0, got {}", input.unit_price),
        ));
    }
    if input.label.description.trim().is_empty() {
        return Err(LedgerError::invalid("description", "must not be empty"));
    }
    Ok(ProgressItem {
        id,
        origin: ItemOrigin::Amendment,
        label: input.label,
        unit_price: input.unit_price,
        quantity: Qty::ZERO,
        quantite_precedente: Qty::ZERO,
        quantite_actuelle: Qty::ZERO,
        quantite_totale: Qty::ZERO,
        montant_precedent: Micros::ZERO,
        montant_actuel: Micros::ZERO,
        montant_total: Micros::ZERO,
        carried: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{LineLabel, Scope};
    use chrono::NaiveDate;

    fn label() -> LineLabel {
        LineLabel {
            article: "2.1".to_string(),
            description: "Maçonnerie".to_string(),
            line_type: "TRAVAUX".to_string(),
            unit: "m2".to_string(),
        }
    }

    fn order_line(price_units: i64, qty_units: i64) -> OrderLine {
        OrderLine {
            id: Uuid::from_u128(50),
            label: label(),
            unit_price: Micros::from_units(price_units).unwrap(),
            quantity: Qty::from_units(qty_units).unwrap(),
            line_total: Micros::from_units(price_units * qty_units).unwrap(),
        }
    }

    fn draft_with(items: Vec<ProgressItem>, amendments: Vec<ProgressItem>) -> ProgressStatement {
        ProgressStatement {
            id: Uuid::from_u128(900),
            scope: Scope::client(Uuid::from_u128(1), Uuid::from_u128(2)),
            number: 1,
            date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            period_label: None,
            comments: None,
            finalized: false,
            client_statement_ref: None,
            lines: items,
            amendments,
        }
    }

    #[test]
    fn compute_is_pure_and_idempotent() {
        let a = compute(
            Qty::from_units(40).unwrap(),
            Micros::from_units(400).unwrap(),
            Qty::from_units(30).unwrap(),
            Micros::from_units(10).unwrap(),
        )
        .unwrap();
        let b = compute(
            Qty::from_units(40).unwrap(),
            Micros::from_units(400).unwrap(),
            Qty::from_units(30).unwrap(),
            Micros::from_units(10).unwrap(),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.quantite_totale, Qty::from_units(70).unwrap());
        assert_eq!(a.montant_actuel, Micros::from_units(300).unwrap());
        assert_eq!(a.montant_total, Micros::from_units(700).unwrap());
    }

    #[test]
    fn recompute_twice_changes_nothing() {
        let mut item = carry_item(Uuid::from_u128(2), &seed_line(Uuid::from_u128(1), &order_line(10, 100)));
        item.quantite_actuelle = Qty::new(12_345);
        recompute(&mut item).unwrap();
        let once = item.clone();
        recompute(&mut item).unwrap();
        assert_eq!(once, item);
        assert!(is_consistent(&item));
    }

    #[test]
    fn seed_line_is_all_zero() {
        let item = seed_line(Uuid::from_u128(1), &order_line(10, 100));
        assert_eq!(item.quantite_totale, Qty::ZERO);
        assert_eq!(item.montant_total, Micros::ZERO);
        assert_eq!(item.quantity, Qty::from_units(100).unwrap());
        assert_eq!(item.order_line_id(), Some(Uuid::from_u128(50)));
    }

    #[test]
    fn carry_moves_totals_into_precedents() {
        let mut stmt = draft_with(vec![seed_line(Uuid::from_u128(1), &order_line(10, 100))], vec![]);
        set_current_quantity(&mut stmt, Uuid::from_u128(1), Qty::from_units(40).unwrap()).unwrap();

        let next = carry_item(Uuid::from_u128(2), &stmt.lines[0]);
        assert_eq!(next.quantite_precedente, Qty::from_units(40).unwrap());
        assert_eq!(next.montant_precedent, Micros::from_units(400).unwrap());
        assert_eq!(next.quantite_actuelle, Qty::ZERO);
        assert_eq!(next.montant_actuel, Micros::ZERO);
        assert_eq!(next.quantite_totale, next.quantite_precedente);
        assert_eq!(next.montant_total, next.montant_precedent);
        assert!(is_consistent(&next));
    }

    #[test]
    fn finalized_statement_is_immutable() {
        let mut stmt = draft_with(vec![seed_line(Uuid::from_u128(1), &order_line(10, 100))], vec![]);
        stmt.finalized = true;
        let err = set_current_quantity(&mut stmt, Uuid::from_u128(1), Qty::from_units(1).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ImmutableStatement);
        assert_eq!(stmt.lines[0].quantite_actuelle, Qty::ZERO);
    }

    #[test]
    fn negative_and_over_contract_rejected() {
        let mut stmt = draft_with(vec![seed_line(Uuid::from_u128(1), &order_line(10, 100))], vec![]);
        let err = set_current_quantity(&mut stmt, Uuid::from_u128(1), Qty::new(-1)).unwrap_err();
        assert!(matches!(err, LedgerError::NegativeQuantity { .. }));

        let err = set_current_quantity(&mut stmt, Uuid::from_u128(1), Qty::new(100_001))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ExceedsContract { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        // exactly the contracted quantity is fine
        set_current_quantity(&mut stmt, Uuid::from_u128(1), Qty::from_units(100).unwrap()).unwrap();
    }

    #[test]
    fn amendments_have_no_ceiling() {
        let amendment = new_amendment(
            Uuid::from_u128(7),
            NewAmendment {
                label: label(),
                unit_price: Micros::from_units(50).unwrap(),
            },
        )
        .unwrap();
        let mut stmt = draft_with(vec![], vec![amendment]);
        let item = set_current_quantity(&mut stmt, Uuid::from_u128(7), Qty::from_units(2).unwrap())
            .unwrap();
        assert_eq!(item.montant_actuel, Micros::from_units(100).unwrap());

        let item = set_current_quantity(&mut stmt, Uuid::from_u128(7), Qty::from_units(5_000).unwrap())
            .unwrap();
        assert_eq!(item.montant_total, Micros::from_units(250_000).unwrap());
    }

    #[test]
    fn unknown_item_is_not_found() {
        let mut stmt = draft_with(vec![], vec![]);
        let err = set_current_quantity(&mut stmt, Uuid::from_u128(42), Qty::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
