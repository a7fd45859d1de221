//! Append-only audit trail of ledger commands.
//!
//! One JSON line per accepted command. With the hash chain on, every event
//! carries `hash_prev` (the previous event's `hash_self`) and `hash_self`
//! (SHA-256 of its own canonical JSON without `hash_self`), so any edit,
//! insertion or deletion in the file is detected by [`verify_hash_chain`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6564_612d_6175_6469_742d_6576_656e_7401);

/// Ledger commands that leave an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    OrderCreated,
    OrderLineAdded,
    OrderLineUpdated,
    OrderLineRemoved,
    OrderLocked,
    OrderUnlocked,
    StatementCreated,
    QuantitySet,
    AmendmentAdded,
    AmendmentRemoved,
    StatementValidated,
    StatementReopened,
    StatementDeleted,
    PhotoAttached,
}

impl LedgerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEvent::OrderCreated => "ORDER_CREATED",
            LedgerEvent::OrderLineAdded => "ORDER_LINE_ADDED",
            LedgerEvent::OrderLineUpdated => "ORDER_LINE_UPDATED",
            LedgerEvent::OrderLineRemoved => "ORDER_LINE_REMOVED",
            LedgerEvent::OrderLocked => "ORDER_LOCKED",
            LedgerEvent::OrderUnlocked => "ORDER_UNLOCKED",
            LedgerEvent::StatementCreated => "STATEMENT_CREATED",
            LedgerEvent::QuantitySet => "QUANTITY_SET",
            LedgerEvent::AmendmentAdded => "AMENDMENT_ADDED",
            LedgerEvent::AmendmentRemoved => "AMENDMENT_REMOVED",
            LedgerEvent::StatementValidated => "STATEMENT_VALIDATED",
            LedgerEvent::StatementReopened => "STATEMENT_REOPENED",
            LedgerEvent::StatementDeleted => "STATEMENT_DELETED",
            LedgerEvent::PhotoAttached => "PHOTO_ATTACHED",
        }
    }

    /// `ORDER` or `STATEMENT`.
    pub fn topic(&self) -> &'static str {
        match self {
            LedgerEvent::OrderCreated
            | LedgerEvent::OrderLineAdded
            | LedgerEvent::OrderLineUpdated
            | LedgerEvent::OrderLineRemoved
            | LedgerEvent::OrderLocked
            | LedgerEvent::OrderUnlocked => "ORDER",
            _ => "STATEMENT",
        }
    }
}

/// Append-only audit writer. Writes JSON Lines (one event per line).
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Number of events already in the log; the next event's seq.
    seq: u64,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist. Starts a new
    /// chain; use [`AuditWriter::resume`] to continue an existing file.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open `path` for appending, continuing its chain: the last event's
    /// `hash_self` becomes the next `hash_prev`. A missing file starts fresh.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut w = Self::new(path, hash_chain)?;
        if !w.path.exists() {
            return Ok(w);
        }
        let content =
            fs::read_to_string(&w.path).with_context(|| format!("read audit log {:?}", w.path))?;
        let mut last: Option<AuditEvent> = None;
        let mut count = 0u64;
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let ev: AuditEvent = serde_json::from_str(trimmed)
                .with_context(|| format!("parse audit event at line {}", i + 1))?;
            count += 1;
            last = Some(ev);
        }
        w.seq = count;
        w.last_hash = last.and_then(|ev| ev.hash_self);
        Ok(w)
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one ledger event under `scope`, normally a `Scope::key()`.
    pub fn record(&mut self, scope: &str, event: LedgerEvent, payload: Value) -> Result<AuditEvent> {
        self.append(scope, event.topic(), event.as_str(), payload)
    }

    /// Append one event.
    pub fn append(
        &mut self,
        scope: &str,
        topic: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<AuditEvent> {
        let ts_utc = Utc::now();
        let event_id = derive_event_id(self.last_hash.as_deref(), &payload, self.seq)?;

        let mut ev = AuditEvent {
            event_id,
            seq: self.seq,
            scope: scope.to_string(),
            ts_utc,
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            ev.hash_self = Some(compute_event_hash(&ev)?);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        self.seq += 1;
        if self.hash_chain {
            self.last_hash = ev.hash_self.clone();
        }
        Ok(ev)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub seq: u64,
    pub scope: String,
    pub ts_utc: DateTime<Utc>,
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Event id as UUIDv5 over (previous hash, seq, canonical payload). No RNG:
/// replaying the same chain yields the same ids.
pub fn derive_event_id(prev_hash: Option<&str>, payload: &Value, seq: u64) -> Result<Uuid> {
    let canonical = canonical_json_line(payload)?;
    let name = format!("{}|{}|{}", prev_hash.unwrap_or("-"), seq, canonical);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash of the canonical JSON of `ev` without `hash_self`.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of an audit log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same as [`verify_hash_chain`] over in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;

        if ev.seq != line_count as u64 {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("seq mismatch: expected {}, got {}", line_count, ev.seq),
            });
        }
        line_count += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed_hash, recomputed
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_id_is_deterministic() {
        let p = json!({"b": 1, "a": 2});
        let a = derive_event_id(Some("abc"), &p, 3).unwrap();
        let b = derive_event_id(Some("abc"), &json!({"a": 2, "b": 1}), 3).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, derive_event_id(Some("abc"), &p, 4).unwrap());
    }

    #[test]
    fn topics_split_orders_and_statements() {
        assert_eq!(LedgerEvent::OrderLocked.topic(), "ORDER");
        assert_eq!(LedgerEvent::StatementReopened.topic(), "STATEMENT");
        assert_eq!(LedgerEvent::QuantitySet.as_str(), "QUANTITY_SET");
    }
}
