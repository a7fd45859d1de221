//! `eda order` handlers.

use anyhow::Result;
use clap::Subcommand;
use eda_audit::LedgerEvent;
use eda_config::LedgerConfig;
use eda_ledger::{Order, Qty, VatRate};
use serde_json::json;
use uuid::Uuid;

use super::{audit, connect, LineArgs, ScopeArgs};

#[derive(Subcommand)]
pub enum OrderCmd {
    /// Create an unlocked draft order for a scope.
    Create {
        #[command(flatten)]
        scope: ScopeArgs,

        /// VAT rate in percent (defaults to ledger.default_vat_bps)
        #[arg(long)]
        vat: Option<VatRate>,
    },

    /// Print the order header and lines.
    Show {
        #[arg(long)]
        order_id: Uuid,
    },

    /// Append a line (order must be unlocked).
    AddLine {
        #[arg(long)]
        order_id: Uuid,

        #[command(flatten)]
        line: LineArgs,

        /// Contracted quantity, decimal
        #[arg(long)]
        quantity: Qty,
    },

    /// Remove a line (order must be unlocked).
    RemoveLine {
        #[arg(long)]
        order_id: Uuid,

        #[arg(long)]
        line_id: Uuid,
    },

    /// Lock the order (DRAFT -> VALIDATED). Idempotent.
    Lock {
        #[arg(long)]
        order_id: Uuid,
    },

    /// Unlock the order (VALIDATED -> DRAFT).
    Unlock {
        #[arg(long)]
        order_id: Uuid,
    },
}

pub async fn dispatch(cfg: &LedgerConfig, cmd: OrderCmd) -> Result<()> {
    let pool = connect(cfg).await?;

    match cmd {
        OrderCmd::Create { scope, vat } => {
            let scope = scope.scope();
            let vat_rate = vat.unwrap_or_else(|| cfg.default_vat_rate());
            let order = eda_db::create_order(&pool, scope, vat_rate, Vec::new()).await?;
            println!("order_id={} scope={} vat_rate={}", order.id, scope, order.vat_rate);
            audit(
                cfg,
                &scope,
                LedgerEvent::OrderCreated,
                json!({"order_id": order.id, "vat_bps": order.vat_rate.bps()}),
            )?;
        }

        OrderCmd::Show { order_id } => {
            let order = eda_db::fetch_order(&pool, order_id).await?;
            print_order(&order);
        }

        OrderCmd::AddLine {
            order_id,
            line,
            quantity,
        } => {
            let added = eda_db::add_order_line(&pool, order_id, line.order_line(quantity)).await?;
            let order = eda_db::fetch_order(&pool, order_id).await?;
            println!(
                "line_id={} line_total={} order_subtotal={}",
                added.id, added.line_total, order.subtotal
            );
            audit(
                cfg,
                &order.scope,
                LedgerEvent::OrderLineAdded,
                json!({
                    "order_id": order_id,
                    "line_id": added.id,
                    "article": added.label.article,
                    "unit_price": added.unit_price.to_string(),
                    "quantity": added.quantity.to_string(),
                }),
            )?;
        }

        OrderCmd::RemoveLine { order_id, line_id } => {
            let removed = eda_db::remove_order_line(&pool, order_id, line_id).await?;
            let order = eda_db::fetch_order(&pool, order_id).await?;
            println!("removed=true line_id={} order_subtotal={}", removed.id, order.subtotal);
            audit(
                cfg,
                &order.scope,
                LedgerEvent::OrderLineRemoved,
                json!({"order_id": order_id, "line_id": removed.id}),
            )?;
        }

        OrderCmd::Lock { order_id } => {
            let changed = eda_db::lock_order(&pool, order_id).await?;
            println!("locked=true changed={} order_id={} status=VALIDATED", changed, order_id);
            if changed {
                let order = eda_db::fetch_order(&pool, order_id).await?;
                audit(cfg, &order.scope, LedgerEvent::OrderLocked, json!({"order_id": order_id}))?;
            }
        }

        OrderCmd::Unlock { order_id } => {
            let changed = eda_db::unlock_order(&pool, order_id).await?;
            println!("locked=false changed={} order_id={} status=DRAFT", changed, order_id);
            if changed {
                let order = eda_db::fetch_order(&pool, order_id).await?;
                audit(cfg, &order.scope, LedgerEvent::OrderUnlocked, json!({"order_id": order_id}))?;
            }
        }
    }

    Ok(())
}

fn print_order(order: &Order) {
    println!("order_id={}", order.id);
    println!("scope={}", order.scope);
    println!("status={}", order.status.as_str());
    println!("locked={}", order.locked);
    println!("vat_rate={}", order.vat_rate);
    println!("subtotal={}", order.subtotal);
    println!("vat_amount={}", order.vat_amount);
    println!("total={}", order.total);
    for line in &order.lines {
        println!(
            "line id={} article={} unit={} unit_price={} quantity={} line_total={}",
            line.id,
            line.label.article,
            line.label.unit,
            line.unit_price,
            line.quantity,
            line.line_total
        );
    }
}
