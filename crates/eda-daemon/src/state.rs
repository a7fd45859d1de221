//! Shared runtime state for eda-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The ledger itself lives
//! behind [`LedgerBackend`]; this module only adds the event bus and the
//! audit trail around it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eda_audit::{AuditWriter, LedgerEvent};
use eda_ledger::VatRate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::error;

use crate::backend::{LedgerBackend, MemBackend};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Ledger(LedgerNotice),
}

/// A committed ledger command, for downstream consumers (PDF, mail...).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerNotice {
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub scope: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    pub backend: Arc<dyn LedgerBackend>,
    /// VAT rate for orders created without one.
    pub default_vat: VatRate,
    /// Audit trail; `None` disables it.
    pub audit: Option<Arc<Mutex<AuditWriter>>>,
}

impl AppState {
    pub fn new(backend: Arc<dyn LedgerBackend>, default_vat: VatRate) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "eda-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            backend,
            default_vat,
            audit: None,
        }
    }

    /// Memory-backed state at the French standard rate, no audit.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemBackend::new()), VatRate::from_bps(2_000))
    }

    pub fn with_audit(mut self, writer: AuditWriter) -> Self {
        self.audit = Some(Arc::new(Mutex::new(writer)));
        self
    }

    /// Record a committed command: audit line, then bus notice. The command
    /// is already durable; an audit write failure is logged, not returned.
    pub async fn committed(&self, scope: &str, event: LedgerEvent, payload: Value) {
        if let Some(audit) = &self.audit {
            let mut w = audit.lock().await;
            if let Err(e) = w.record(scope, event, payload.clone()) {
                error!(scope, event = event.as_str(), error = %format!("{e:#}"), "audit write failed");
            }
        }
        let _ = self.bus.send(BusMsg::Ledger(LedgerNotice {
            ts_utc: Utc::now(),
            topic: event.topic().to_string(),
            event_type: event.as_str().to_string(),
            scope: scope.to_string(),
            payload,
        }));
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}
