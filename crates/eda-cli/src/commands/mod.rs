//! Command handler modules for eda-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod order;
pub mod statement;

use anyhow::{Context, Result};
use clap::Args;
use eda_audit::{AuditWriter, LedgerEvent};
use eda_config::{report_unused_keys, LedgerConfig, UnusedKeyPolicy};
use eda_ledger::{LineLabel, Micros, NewOrderLine, Qty, Scope};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Load the layered config, or built-in defaults when no path is given.
/// Unused keys are reported on stderr, never fatal here.
pub fn load_config(paths: &[String]) -> Result<LedgerConfig> {
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = eda_config::load_layered_yaml(&path_refs)?;

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn)?;
    if !report.is_clean() {
        eprintln!(
            "WARN: CONFIG_UNUSED_KEYS unused_leaf_keys={}",
            report.unused_leaf_pointers.len()
        );
        for p in report.unused_leaf_pointers.iter().take(50) {
            eprintln!("  unused={}", p);
        }
    }

    tracing::debug!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");
    loaded.typed()
}

/// Connect using the env var named by `database.url_env`.
pub async fn connect(cfg: &LedgerConfig) -> Result<PgPool> {
    let var = &cfg.database.url_env;
    let url = std::env::var(var).with_context(|| format!("missing env var {var}"))?;
    eda_db::connect(&url).await
}

/// Append one event to the configured audit log and print where it went.
pub fn audit(cfg: &LedgerConfig, scope: &Scope, event: LedgerEvent, payload: Value) -> Result<()> {
    let mut writer = AuditWriter::resume(&cfg.audit.path, cfg.audit.hash_chain)?;
    let ev = writer.record(&scope.key(), event, payload)?;
    println!("audit_event_id={} audit_seq={}", ev.event_id, ev.seq);
    Ok(())
}

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(v).context("json stringify failed")?;
    println!("{s}");
    Ok(())
}

/// Identifies one ledger: the chantier, the order, and for mirrors the
/// subcontractor.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    #[arg(long)]
    pub chantier: Uuid,

    /// Order id (client order, or the subcontractor's order for mirrors)
    #[arg(long)]
    pub order: Uuid,

    /// Subcontractor id; selects the subcontractor mirror ledger
    #[arg(long)]
    pub subcontractor: Option<Uuid>,
}

impl ScopeArgs {
    pub fn scope(&self) -> Scope {
        Scope::from_parts(self.chantier, self.subcontractor, self.order)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LineArgs {
    #[arg(long)]
    pub article: String,

    #[arg(long, default_value = "")]
    pub description: String,

    /// Line type (e.g. FOURNITURE, MAIN_OEUVRE)
    #[arg(long = "type", default_value = "")]
    pub line_type: String,

    /// Unit (m2, m3, h, u...)
    #[arg(long, default_value = "u")]
    pub unit: String,

    /// Unit price, decimal (e.g. 12.50)
    #[arg(long)]
    pub unit_price: Micros,
}

impl LineArgs {
    pub fn label(&self) -> LineLabel {
        LineLabel {
            article: self.article.clone(),
            description: self.description.clone(),
            line_type: self.line_type.clone(),
            unit: self.unit.clone(),
        }
    }

    pub fn order_line(&self, quantity: Qty) -> NewOrderLine {
        NewOrderLine {
            label: self.label(),
            unit_price: self.unit_price,
            quantity,
        }
    }
}
