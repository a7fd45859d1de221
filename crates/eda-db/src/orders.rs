//! Order Ledger commands.

use anyhow::{Context, Result};
use eda_ledger::{LedgerError, NewOrderLine, Order, OrderLine, Scope, VatRate};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::codec;
use crate::is_unique_constraint_violation;

const ORDER_COLUMNS: &str = r#"
    order_id, chantier_id, subcontractor_id, vat_bps,
    subtotal_micros, vat_micros, total_micros, locked, status
"#;

/// Create an unlocked draft order keyed by `scope`, with its lines.
pub async fn create_order(
    pool: &PgPool,
    scope: Scope,
    vat_rate: VatRate,
    lines: Vec<NewOrderLine>,
) -> Result<Order> {
    let mut order = Order::new(scope.order_id(), scope, vat_rate)?;
    for line in lines {
        order.add_line(Uuid::new_v4(), line)?;
    }

    let mut tx = pool.begin().await.context("create_order begin failed")?;
    let res = sqlx::query(
        r#"
        insert into orders (
          order_id, chantier_id, subcontractor_id, scope_key, vat_bps,
          subtotal_micros, vat_micros, total_micros, locked, status
        ) values (
          $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
        )
        "#,
    )
    .bind(order.id)
    .bind(scope.chantier_id())
    .bind(scope.subcontractor_id())
    .bind(scope.key())
    .bind(order.vat_rate.bps())
    .bind(order.subtotal.raw())
    .bind(order.vat_amount.raw())
    .bind(order.total.raw())
    .bind(order.locked)
    .bind(order.status.as_str())
    .execute(&mut *tx)
    .await;

    if let Err(e) = res {
        if is_unique_constraint_violation(&e, "orders_pkey")
            || is_unique_constraint_violation(&e, "uq_orders_scope_key")
        {
            return Err(LedgerError::Invalid {
                field: "order",
                reason: format!("order already exists for {scope}"),
            }
            .into());
        }
        return Err(anyhow::Error::new(e).context("create_order insert failed"));
    }

    write_lines(&mut tx, &order).await?;
    tx.commit().await.context("create_order commit failed")?;

    info!(%scope, order_id = %order.id, lines = order.lines.len(), total = %order.total, "order created");
    Ok(order)
}

pub async fn fetch_order(pool: &PgPool, order_id: Uuid) -> Result<Order> {
    let mut conn = pool.acquire().await.context("fetch_order acquire failed")?;
    load_order(&mut conn, order_id, RowLock::None).await
}

pub async fn add_order_line(pool: &PgPool, order_id: Uuid, line: NewOrderLine) -> Result<OrderLine> {
    edit_order(pool, order_id, "add_order_line", |o| {
        o.add_line(Uuid::new_v4(), line)
    })
    .await
}

pub async fn update_order_line(
    pool: &PgPool,
    order_id: Uuid,
    line_id: Uuid,
    line: NewOrderLine,
) -> Result<OrderLine> {
    edit_order(pool, order_id, "update_order_line", |o| {
        o.update_line(line_id, line)
    })
    .await
}

pub async fn remove_order_line(pool: &PgPool, order_id: Uuid, line_id: Uuid) -> Result<OrderLine> {
    edit_order(pool, order_id, "remove_order_line", |o| o.remove_line(line_id)).await
}

/// Recompute and persist subtotal / VAT / total from the stored lines.
pub async fn recompute_totals(pool: &PgPool, order_id: Uuid) -> Result<Order> {
    let mut tx = pool.begin().await.context("recompute_totals begin failed")?;
    let mut order = load_order(&mut tx, order_id, RowLock::Update).await?;
    order.recompute_totals()?;
    write_header(&mut tx, &order).await?;
    tx.commit().await.context("recompute_totals commit failed")?;
    Ok(order)
}

/// locked=true, status=VALIDATED. Idempotent: `false` when already locked.
pub async fn lock_order(pool: &PgPool, order_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await.context("lock_order begin failed")?;
    let mut order = load_order(&mut tx, order_id, RowLock::Update).await?;
    let changed = order.lock();
    if changed {
        write_header(&mut tx, &order).await?;
    }
    tx.commit().await.context("lock_order commit failed")?;
    if changed {
        info!(%order_id, "order locked");
    }
    Ok(changed)
}

/// locked=false, status=DRAFT, unconditionally.
pub async fn unlock_order(pool: &PgPool, order_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await.context("unlock_order begin failed")?;
    let mut order = load_order(&mut tx, order_id, RowLock::Update).await?;
    let changed = order.unlock();
    if changed {
        write_header(&mut tx, &order).await?;
    }

    let (existing,): (i64,) = sqlx::query_as::<_, (i64,)>(
        "select count(*)::bigint from progress_statements where scope_key = $1",
    )
    .bind(order.scope.key())
    .fetch_one(&mut *tx)
    .await
    .context("unlock_order statement count failed")?;

    tx.commit().await.context("unlock_order commit failed")?;

    if changed {
        if existing > 0 {
            warn!(%order_id, scope = %order.scope, statements = existing, "order unlocked with existing statements");
        } else {
            info!(%order_id, "order unlocked");
        }
    }
    Ok(changed)
}

/// Load, apply `f` to the order's lines, write back, all in one transaction.
async fn edit_order<T>(
    pool: &PgPool,
    order_id: Uuid,
    op: &'static str,
    f: impl FnOnce(&mut Order) -> eda_ledger::Result<T>,
) -> Result<T> {
    let mut tx = pool
        .begin()
        .await
        .with_context(|| format!("{op} begin failed"))?;
    let mut order = load_order(&mut tx, order_id, RowLock::Update).await?;
    let out = f(&mut order)?;
    write_header(&mut tx, &order).await?;
    write_lines(&mut tx, &order).await?;
    tx.commit()
        .await
        .with_context(|| format!("{op} commit failed"))?;
    tracing::debug!(%order_id, op, subtotal = %order.subtotal, "order lines edited");
    Ok(out)
}

/// Row lock taken on the order header by [`load_order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowLock {
    None,
    /// Blocks lock/unlock and line edits until commit.
    Share,
    Update,
}

impl RowLock {
    fn clause(self) -> &'static str {
        match self {
            RowLock::None => "",
            RowLock::Share => " for share",
            RowLock::Update => " for update",
        }
    }
}

pub(crate) async fn load_order(
    conn: &mut PgConnection,
    order_id: Uuid,
    lock: RowLock,
) -> Result<Order> {
    let sql = format!(
        "select {ORDER_COLUMNS} from orders where order_id = $1{}",
        lock.clause()
    );
    let row = sqlx::query(&sql)
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await
        .context("load_order failed")?
        .ok_or_else(|| LedgerError::NotFound {
            entity: "order",
            id: order_id.to_string(),
        })?;
    let mut order = codec::order_of(&row)?;

    let rows = sqlx::query(
        r#"
        select line_id, article, description, line_type, unit,
               unit_price_micros, quantity_milli, line_total_micros
        from order_lines
        where order_id = $1
        order by position asc
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await
    .context("load_order lines failed")?;
    order.lines = rows
        .iter()
        .map(codec::order_line_of)
        .collect::<Result<Vec<_>>>()?;
    Ok(order)
}

async fn write_header(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        update orders
        set subtotal_micros = $2,
            vat_micros = $3,
            total_micros = $4,
            locked = $5,
            status = $6,
            updated_at_utc = now()
        where order_id = $1
        "#,
    )
    .bind(order.id)
    .bind(order.subtotal.raw())
    .bind(order.vat_amount.raw())
    .bind(order.total.raw())
    .bind(order.locked)
    .bind(order.status.as_str())
    .execute(&mut *conn)
    .await
    .context("order header update failed")?;
    Ok(())
}

/// Replace the stored lines with `order.lines`, preserving order.
async fn write_lines(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query("delete from order_lines where order_id = $1")
        .bind(order.id)
        .execute(&mut *conn)
        .await
        .context("order lines delete failed")?;

    for (position, line) in order.lines.iter().enumerate() {
        sqlx::query(
            r#"
            insert into order_lines (
              line_id, order_id, position, article, description, line_type, unit,
              unit_price_micros, quantity_milli, line_total_micros
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            "#,
        )
        .bind(line.id)
        .bind(order.id)
        .bind(position as i32)
        .bind(&line.label.article)
        .bind(&line.label.description)
        .bind(&line.label.line_type)
        .bind(&line.label.unit)
        .bind(line.unit_price.raw())
        .bind(line.quantity.raw())
        .bind(line.line_total.raw())
        .execute(&mut *conn)
        .await
        .context("order line insert failed")?;
    }
    Ok(())
}
