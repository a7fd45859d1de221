//! `eda statement` handlers.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use eda_audit::LedgerEvent;
use eda_config::LedgerConfig;
use eda_ledger::{NewAmendment, NewPhoto, NewStatement, Qty, StatementState};
use serde_json::json;
use uuid::Uuid;

use super::{audit, connect, print_json, LineArgs, ScopeArgs};

#[derive(Subcommand)]
pub enum StatementCmd {
    /// Create the next statement of a scope (order locked, latest finalized).
    Create {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Statement date (YYYY-MM-DD), defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Period label (e.g. "Mars 2025")
        #[arg(long)]
        period: Option<String>,

        /// Client-side statement this mirror tracks (subcontractor scopes only)
        #[arg(long)]
        client_ref: Option<Uuid>,
    },

    /// Print the statement snapshot as JSON.
    Show {
        #[arg(long)]
        statement_id: Uuid,
    },

    /// List the statements of a scope by number.
    List {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Set the quantity billed this period on one item.
    SetQty {
        #[arg(long)]
        statement_id: Uuid,

        #[arg(long)]
        item_id: Uuid,

        /// Quantity executed this period, decimal
        #[arg(long, allow_negative_numbers = true)]
        qty: Qty,
    },

    /// Add extra work not on the order.
    AddAmendment {
        #[arg(long)]
        statement_id: Uuid,

        #[command(flatten)]
        line: LineArgs,
    },

    /// Finalize a draft statement.
    Validate {
        #[arg(long)]
        statement_id: Uuid,

        #[arg(long)]
        comments: Option<String>,

        #[arg(long)]
        period: Option<String>,
    },

    /// Return the latest finalized statement to draft.
    Reopen {
        #[arg(long)]
        statement_id: Uuid,
    },

    /// Delete a draft statement.
    Delete {
        #[arg(long)]
        statement_id: Uuid,
    },

    /// Link a stored photo to a statement.
    AttachPhoto {
        #[arg(long)]
        statement_id: Uuid,

        /// Key of the file in the external store
        #[arg(long)]
        storage_key: String,

        #[arg(long)]
        description: Option<String>,
    },
}

pub async fn dispatch(cfg: &LedgerConfig, cmd: StatementCmd) -> Result<()> {
    let pool = connect(cfg).await?;

    match cmd {
        StatementCmd::Create {
            scope,
            date,
            period,
            client_ref,
        } => {
            let scope = scope.scope();
            let new = NewStatement {
                date: date.unwrap_or_else(|| Utc::now().date_naive()),
                period_label: period,
                client_statement_ref: client_ref,
            };
            let stmt = eda_db::create_statement(&pool, scope, new).await?;
            println!(
                "statement_id={} number={} lines={} amendments={}",
                stmt.id,
                stmt.number,
                stmt.lines.len(),
                stmt.amendments.len()
            );
            for item in stmt.lines.iter().chain(stmt.amendments.iter()) {
                println!(
                    "item id={} article={} quantite_precedente={}",
                    item.id, item.label.article, item.quantite_precedente
                );
            }
            audit(
                cfg,
                &scope,
                LedgerEvent::StatementCreated,
                json!({"statement_id": stmt.id, "number": stmt.number, "date": stmt.date}),
            )?;
        }

        StatementCmd::Show { statement_id } => {
            let snap = eda_db::snapshot(&pool, statement_id).await?;
            print_json(&snap)?;
        }

        StatementCmd::List { scope } => {
            let scope = scope.scope();
            let all = eda_db::list_statements(&pool, &scope).await?;
            println!("scope={} statements={}", scope, all.len());
            for s in &all {
                println!(
                    "number={} statement_id={} date={} state={}",
                    s.number,
                    s.id,
                    s.date,
                    s.state().as_str()
                );
            }
        }

        StatementCmd::SetQty {
            statement_id,
            item_id,
            qty,
        } => {
            let item = eda_db::set_current_quantity(&pool, statement_id, item_id, qty).await?;
            println!(
                "item_id={} quantite_totale={} montant_actuel={} montant_total={}",
                item.id, item.quantite_totale, item.montant_actuel, item.montant_total
            );
            let stmt = eda_db::fetch_statement(&pool, statement_id).await?;
            audit(
                cfg,
                &stmt.scope,
                LedgerEvent::QuantitySet,
                json!({
                    "statement_id": statement_id,
                    "item_id": item.id,
                    "quantite_actuelle": item.quantite_actuelle.to_string(),
                }),
            )?;
        }

        StatementCmd::AddAmendment { statement_id, line } => {
            let input = NewAmendment {
                label: line.label(),
                unit_price: line.unit_price,
            };
            let item = eda_db::add_amendment(&pool, statement_id, input).await?;
            println!("item_id={} article={}", item.id, item.label.article);
            let stmt = eda_db::fetch_statement(&pool, statement_id).await?;
            audit(
                cfg,
                &stmt.scope,
                LedgerEvent::AmendmentAdded,
                json!({
                    "statement_id": statement_id,
                    "item_id": item.id,
                    "unit_price": item.unit_price.to_string(),
                }),
            )?;
        }

        StatementCmd::Validate {
            statement_id,
            comments,
            period,
        } => {
            let changed = eda_db::validate_statement(&pool, statement_id, comments, period).await?;
            println!(
                "statement_id={} state={} changed={}",
                statement_id,
                StatementState::Finalized.as_str(),
                changed
            );
            if changed {
                let stmt = eda_db::fetch_statement(&pool, statement_id).await?;
                audit(
                    cfg,
                    &stmt.scope,
                    LedgerEvent::StatementValidated,
                    json!({"statement_id": statement_id, "number": stmt.number}),
                )?;
            }
        }

        StatementCmd::Reopen { statement_id } => {
            let changed = eda_db::reopen_statement(&pool, statement_id).await?;
            println!(
                "statement_id={} state={} changed={}",
                statement_id,
                StatementState::Draft.as_str(),
                changed
            );
            if changed {
                let stmt = eda_db::fetch_statement(&pool, statement_id).await?;
                audit(
                    cfg,
                    &stmt.scope,
                    LedgerEvent::StatementReopened,
                    json!({"statement_id": statement_id, "number": stmt.number}),
                )?;
            }
        }

        StatementCmd::Delete { statement_id } => {
            let deleted = eda_db::delete_statement(&pool, statement_id).await?;
            println!("deleted=true statement_id={} number={}", deleted.id, deleted.number);
            audit(
                cfg,
                &deleted.scope,
                LedgerEvent::StatementDeleted,
                json!({"statement_id": deleted.id, "number": deleted.number}),
            )?;
        }

        StatementCmd::AttachPhoto {
            statement_id,
            storage_key,
            description,
        } => {
            let photo = NewPhoto {
                storage_key,
                description,
                taken_at: Utc::now(),
            };
            let photo = eda_db::attach_photo(&pool, statement_id, photo).await?;
            println!("photo_id={} statement_id={}", photo.id, statement_id);
            let stmt = eda_db::fetch_statement(&pool, statement_id).await?;
            audit(
                cfg,
                &stmt.scope,
                LedgerEvent::PhotoAttached,
                json!({"statement_id": statement_id, "photo_id": photo.id, "storage_key": photo.storage_key}),
            )?;
        }
    }

    Ok(())
}
