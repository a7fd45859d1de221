//! Unused-key guard.
//!
//! "Consumed pointers" are JSON Pointer prefixes read by the workspace. A
//! leaf under any consumed prefix is consumed; every other leaf is unused
//! and usually a typo (`ledger/default_vat` instead of `default_vat_bps`).

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every config pointer the workspace reads.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/ledger/default_vat_bps",
    "/database/url_env",
    "/audit/path",
    "/audit/hash_chain",
    "/daemon/addr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Minimal set of unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// With `Fail`, unused keys are an error; with `Warn` the report is
/// returned for the caller to log.
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|leaf| !CONSUMED_POINTERS.iter().any(|p| is_prefix_pointer(p, leaf)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        unused_leaf_pointers: unused,
    };
    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unused config leaf key(s) detected. First few: {:?}",
            report.unused_leaf_pointers.len(),
            report
                .unused_leaf_pointers
                .iter()
                .take(12)
                .collect::<Vec<_>>()
        );
    }
    Ok(report)
}

/// `"/a/b"` consumes `"/a/b"` and `"/a/b/c"` but not `"/a/bc"`.
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    match leaf.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub(crate) fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}
