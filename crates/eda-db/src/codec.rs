//! Row <-> domain conversions.

use anyhow::{anyhow, Context, Result};
use eda_ledger::{
    ItemOrigin, LineLabel, Micros, Order, OrderLine, OrderStatus, Photo, ProgressItem,
    ProgressStatement, Qty, Scope, VatRate,
};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

pub(crate) const KIND_LINE: &str = "LINE";
pub(crate) const KIND_AMENDMENT: &str = "AMENDMENT";

pub(crate) fn scope_of(row: &PgRow) -> Result<Scope> {
    Ok(Scope::from_parts(
        row.try_get("chantier_id")?,
        row.try_get("subcontractor_id")?,
        row.try_get("order_id")?,
    ))
}

fn label_of(row: &PgRow) -> Result<LineLabel> {
    Ok(LineLabel {
        article: row.try_get("article")?,
        description: row.try_get("description")?,
        line_type: row.try_get("line_type")?,
        unit: row.try_get("unit")?,
    })
}

/// Order header row; `lines` is filled by the caller.
pub(crate) fn order_of(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("order_id")?,
        scope: scope_of(row)?,
        lines: Vec::new(),
        subtotal: Micros::new(row.try_get("subtotal_micros")?),
        vat_rate: VatRate::from_bps(row.try_get("vat_bps")?),
        vat_amount: Micros::new(row.try_get("vat_micros")?),
        total: Micros::new(row.try_get("total_micros")?),
        locked: row.try_get("locked")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
    })
}

pub(crate) fn order_line_of(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        id: row.try_get("line_id")?,
        label: label_of(row)?,
        unit_price: Micros::new(row.try_get("unit_price_micros")?),
        quantity: Qty::new(row.try_get("quantity_milli")?),
        line_total: Micros::new(row.try_get("line_total_micros")?),
    })
}

/// Statement header row; `lines` and `amendments` are filled by the caller.
pub(crate) fn statement_of(row: &PgRow) -> Result<ProgressStatement> {
    let number: i32 = row.try_get("number")?;
    Ok(ProgressStatement {
        id: row.try_get("statement_id")?,
        scope: scope_of(row)?,
        number: u32::try_from(number).with_context(|| format!("bad statement number {number}"))?,
        date: row.try_get("statement_date")?,
        period_label: row.try_get("period_label")?,
        comments: row.try_get("comments")?,
        finalized: row.try_get("finalized")?,
        client_statement_ref: row.try_get("client_statement_ref")?,
        lines: Vec::new(),
        amendments: Vec::new(),
    })
}

/// Decode a progress item row with its owning statement id.
pub(crate) fn item_of(row: &PgRow) -> Result<(Uuid, ProgressItem)> {
    let kind: String = row.try_get("kind")?;
    let order_line_id: Option<Uuid> = row.try_get("order_line_id")?;
    let origin = match (kind.as_str(), order_line_id) {
        (KIND_LINE, Some(order_line_id)) => ItemOrigin::OrderLine { order_line_id },
        (KIND_AMENDMENT, None) => ItemOrigin::Amendment,
        (other, _) => return Err(anyhow!("invalid progress item kind: {other}")),
    };
    let item = ProgressItem {
        id: row.try_get("item_id")?,
        origin,
        label: label_of(row)?,
        unit_price: Micros::new(row.try_get("unit_price_micros")?),
        quantity: Qty::new(row.try_get("quantity_milli")?),
        quantite_precedente: Qty::new(row.try_get("quantite_precedente_milli")?),
        quantite_actuelle: Qty::new(row.try_get("quantite_actuelle_milli")?),
        quantite_totale: Qty::new(row.try_get("quantite_totale_milli")?),
        montant_precedent: Micros::new(row.try_get("montant_precedent_micros")?),
        montant_actuel: Micros::new(row.try_get("montant_actuel_micros")?),
        montant_total: Micros::new(row.try_get("montant_total_micros")?),
        carried: row.try_get("carried")?,
    };
    Ok((row.try_get("statement_id")?, item))
}

pub(crate) fn photo_of(row: &PgRow) -> Result<Photo> {
    Ok(Photo {
        id: row.try_get("photo_id")?,
        statement_id: row.try_get("statement_id")?,
        storage_key: row.try_get("storage_key")?,
        description: row.try_get("description")?,
        taken_at: row.try_get("taken_at_utc")?,
    })
}

pub(crate) fn kind_of(item: &ProgressItem) -> &'static str {
    if item.is_amendment() {
        KIND_AMENDMENT
    } else {
        KIND_LINE
    }
}

/// Statement number as stored.
pub(crate) fn number_col(number: u32) -> Result<i32> {
    i32::try_from(number).with_context(|| format!("statement number out of range: {number}"))
}
