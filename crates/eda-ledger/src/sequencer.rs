//! Progress Statement Sequencer.
//!
//! [`plan_statement`] decides and builds statement k+1 from the scope's order
//! and its current latest statement. It performs no IO: the store loads the
//! inputs and persists the result inside one transaction, holding the scope
//! lock between the read of `latest` and the insert.

use tracing::info;
use uuid::Uuid;

use crate::carry;
use crate::error::{LedgerError, Result};
use crate::types::{NewStatement, Order, ProgressStatement, Scope};

/// Number the next statement of a scope will receive.
pub fn next_number(latest: Option<&ProgressStatement>) -> u32 {
    latest.map(|s| s.number + 1).unwrap_or(1)
}

/// Build the next draft statement of `scope`.
///
/// - The scope's order must be locked.
/// - The latest statement, if any, must be finalized.
/// - No prior statement: one zeroed line per order line.
/// - Otherwise every line and amendment of `latest` is carried forward.
///
/// `next_id` supplies ids for the statement and each item, in that order.
///
/// # Errors
/// [`LedgerError::OrderNotLocked`], [`LedgerError::PreviousNotFinalized`],
/// or a validation error when the inputs disagree about the scope.
pub fn plan_statement(
    scope: &Scope,
    order: &Order,
    latest: Option<&ProgressStatement>,
    new: NewStatement,
    mut next_id: impl FnMut() -> Uuid,
) -> Result<ProgressStatement> {
    if order.scope != *scope {
        return Err(LedgerError::invalid(
            "scope",
            format!("order {} belongs to {}, not {}", order.id, order.scope, scope),
        ));
    }
    if !order.locked {
        return Err(LedgerError::OrderNotLocked {
            scope: scope.key(),
            order_id: order.id,
        });
    }
    if let Some(prev) = latest {
        if prev.scope != *scope {
            return Err(LedgerError::invalid(
                "latest statement",
                format!("statement {} belongs to {}", prev.id, prev.scope),
            ));
        }
        if !prev.finalized {
            return Err(LedgerError::PreviousNotFinalized {
                scope: scope.key(),
                number: prev.number,
            });
        }
    }
    if new.client_statement_ref.is_some() && !scope.is_subcontractor() {
        return Err(LedgerError::invalid(
            "client_statement_ref",
            "only subcontractor statements reference a client statement",
        ));
    }

    let number = next_number(latest);
    let id = next_id();

    let (lines, amendments): (Vec<_>, Vec<_>) = match latest {
        None => {
            let lines = order
                .lines
                .iter()
                .map(|l| carry::seed_line(next_id(), l))
                .collect();
            (lines, Vec::new())
        }
        Some(prev) => {
            let lines = prev
                .lines
                .iter()
                .map(|i| carry::carry_item(next_id(), i))
                .collect();
            let amendments = prev
                .amendments
                .iter()
                .map(|i| carry::carry_item(next_id(), i))
                .collect();
            (lines, amendments)
        }
    };

    let stmt = ProgressStatement {
        id,
        scope: *scope,
        number,
        date: new.date,
        period_label: new.period_label,
        comments: None,
        finalized: false,
        client_statement_ref: new.client_statement_ref,
        lines,
        amendments,
    };

    info!(
        scope = %scope,
        statement_id = %stmt.id,
        number,
        lines = stmt.lines.len(),
        amendments = stmt.amendments.len(),
        "statement planned"
    );
    Ok(stmt)
}

/// Check the carry-forward chain between two consecutive statements:
/// every item of `next` continues the item at the same position of `prev`.
pub fn verify_chain(prev: &ProgressStatement, next: &ProgressStatement) -> Result<()> {
    if next.number != prev.number + 1 {
        return Err(LedgerError::invalid(
            "number",
            format!("{} does not follow {}", next.number, prev.number),
        ));
    }
    let pairs = [
        ("lines", &prev.lines, &next.lines),
        ("amendments", &prev.amendments, &next.amendments),
    ];
    for (field, before, after) in pairs {
        // Amendments may be appended to `next`; carried ones keep their position.
        if after.len() < before.len() || (field == "lines" && after.len() != before.len()) {
            return Err(LedgerError::invalid(
                "carry chain",
                format!("{field}: {} before, {} after", before.len(), after.len()),
            ));
        }
        for (j, (b, a)) in before.iter().zip(after.iter()).enumerate() {
            if a.quantite_precedente != b.quantite_totale || a.montant_precedent != b.montant_total {
                return Err(LedgerError::invalid(
                    "carry chain",
                    format!("{field}[{j}] does not continue statement {}", prev.number),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixedpoint::{Micros, Qty, VatRate};
    use crate::types::{LineLabel, NewOrderLine};
    use chrono::NaiveDate;

    fn ids() -> impl FnMut() -> Uuid {
        let mut n = 1_000u128;
        move || {
            n += 1;
            Uuid::from_u128(n)
        }
    }

    fn locked_order() -> Order {
        let order_id = Uuid::from_u128(2);
        let mut o = Order::new(
            order_id,
            Scope::client(Uuid::from_u128(1), order_id),
            VatRate::from_bps(2_000),
        )
        .unwrap();
        for (i, (price, qty)) in [(10, 100), (25, 8)].into_iter().enumerate() {
            o.add_line(
                Uuid::from_u128(100 + i as u128),
                NewOrderLine {
                    label: LineLabel {
                        article: format!("{}", i + 1),
                        description: format!("poste {}", i + 1),
                        line_type: "TRAVAUX".to_string(),
                        unit: "u".to_string(),
                    },
                    unit_price: Micros::from_units(price).unwrap(),
                    quantity: Qty::from_units(qty).unwrap(),
                },
            )
            .unwrap();
        }
        o.lock();
        o
    }

    fn date() -> NewStatement {
        NewStatement::dated(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap())
    }

    #[test]
    fn first_statement_seeds_from_order() {
        let order = locked_order();
        let s = plan_statement(&order.scope, &order, None, date(), ids()).unwrap();
        assert_eq!(s.number, 1);
        assert!(!s.finalized);
        assert_eq!(s.lines.len(), 2);
        assert!(s.amendments.is_empty());
        for (item, line) in s.lines.iter().zip(order.lines.iter()) {
            assert_eq!(item.order_line_id(), Some(line.id));
            assert_eq!(item.unit_price, line.unit_price);
            assert_eq!(item.quantity, line.quantity);
            assert_eq!(item.quantite_totale, Qty::ZERO);
        }
    }

    #[test]
    fn unlocked_order_is_a_precondition_failure() {
        let mut order = locked_order();
        order.unlock();
        let err = plan_statement(&order.scope, &order, None, date(), ids()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("order not locked"));
    }

    #[test]
    fn draft_latest_blocks_next() {
        let order = locked_order();
        let first = plan_statement(&order.scope, &order, None, date(), ids()).unwrap();
        let err = plan_statement(&order.scope, &order, Some(&first), date(), ids()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(err.to_string().contains("previous statement not finalized"));
    }

    #[test]
    fn next_statement_carries_lines_and_amendments() {
        let order = locked_order();
        let mut first = plan_statement(&order.scope, &order, None, date(), ids()).unwrap();
        let line_id = first.lines[0].id;
        carry::set_current_quantity(&mut first, line_id, Qty::from_units(40).unwrap()).unwrap();
        let amendment = first
            .add_amendment(
                Uuid::from_u128(77),
                crate::types::NewAmendment {
                    label: LineLabel {
                        article: "AV1".to_string(),
                        description: "Plus-value".to_string(),
                        line_type: "AVENANT".to_string(),
                        unit: "u".to_string(),
                    },
                    unit_price: Micros::from_units(50).unwrap(),
                },
            )
            .unwrap();
        carry::set_current_quantity(&mut first, amendment.id, Qty::from_units(2).unwrap()).unwrap();
        first.finalized = true;

        let second = plan_statement(&order.scope, &order, Some(&first), date(), ids()).unwrap();
        assert_eq!(second.number, 2);
        assert_eq!(second.lines.len(), 2);
        assert_eq!(second.amendments.len(), 1);
        assert_eq!(second.lines[0].quantite_precedente, Qty::from_units(40).unwrap());
        assert_eq!(second.lines[0].montant_precedent, Micros::from_units(400).unwrap());
        assert_eq!(second.amendments[0].montant_precedent, Micros::from_units(100).unwrap());
        assert!(second.items().all(|i| i.quantite_actuelle == Qty::ZERO));
        verify_chain(&first, &second).unwrap();
    }

    #[test]
    fn client_ref_only_on_subcontractor_scope() {
        let order = locked_order();
        let mut new = date();
        new.client_statement_ref = Some(Uuid::from_u128(5));
        let err = plan_statement(&order.scope, &order, None, new, ids()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn verify_chain_detects_broken_precedent() {
        let order = locked_order();
        let mut first = plan_statement(&order.scope, &order, None, date(), ids()).unwrap();
        first.finalized = true;
        let mut second = plan_statement(&order.scope, &order, Some(&first), date(), ids()).unwrap();
        second.lines[1].quantite_precedente = Qty::new(1);
        assert!(verify_chain(&first, &second).is_err());
    }
}
