use anyhow::{bail, Result};
use eda_ledger::VatRate;
use serde::{Deserialize, Serialize};

/// Typed view of the merged config. Every section has defaults, so an
/// empty document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub ledger: LedgerSection,
    pub database: DatabaseSection,
    pub audit: AuditSection,
    pub daemon: DaemonSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    /// VAT rate for new orders when the caller gives none, in basis points.
    pub default_vat_bps: i64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            default_vat_bps: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Name of the env var holding the Postgres URL. Never the URL itself.
    pub url_env: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url_env: "EDA_DATABASE_URL".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub path: String,
    pub hash_chain: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: "var/audit/ledger.jsonl".to_string(),
            hash_chain: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub addr: String,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8898".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn default_vat_rate(&self) -> VatRate {
        VatRate::from_bps(self.ledger.default_vat_bps)
    }

    pub fn validate(&self) -> Result<()> {
        let bps = self.ledger.default_vat_bps;
        if !(0..=10_000).contains(&bps) {
            bail!("CONFIG_INVALID ledger.default_vat_bps={bps}: must be within 0..=10000");
        }
        if self.database.url_env.trim().is_empty() {
            bail!("CONFIG_INVALID database.url_env: must name an env var");
        }
        if self.audit.path.trim().is_empty() {
            bail!("CONFIG_INVALID audit.path: must not be empty");
        }
        Ok(())
    }
}
