//! Item lookup and amendment edits on a single statement.

use uuid::Uuid;

use crate::carry;
use crate::error::{LedgerError, Result};
use crate::types::{NewAmendment, ProgressItem, ProgressStatement};

impl ProgressStatement {
    /// Lines first, then amendments, in display order.
    pub fn items(&self) -> impl Iterator<Item = &ProgressItem> {
        self.lines.iter().chain(self.amendments.iter())
    }

    pub fn item(&self, item_id: Uuid) -> Option<&ProgressItem> {
        self.items().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: Uuid) -> Option<&mut ProgressItem> {
        self.lines
            .iter_mut()
            .chain(self.amendments.iter_mut())
            .find(|i| i.id == item_id)
    }

    /// `true` if any line or amendment bills something this period.
    pub fn has_current_progress(&self) -> bool {
        self.items().any(|i| i.quantite_actuelle.is_positive())
    }

    /// Append a zero-quantity amendment to a draft statement.
    pub fn add_amendment(&mut self, item_id: Uuid, input: NewAmendment) -> Result<ProgressItem> {
        self.ensure_draft()?;
        let item = carry::new_amendment(item_id, input)?;
        self.amendments.push(item.clone());
        Ok(item)
    }

    /// Remove an amendment from a draft statement.
    ///
    /// Only amendments introduced by this statement can go: one carried from
    /// an earlier statement anchors the carry-forward chain of every later
    /// statement.
    pub fn remove_amendment(&mut self, item_id: Uuid) -> Result<ProgressItem> {
        self.ensure_draft()?;
        let idx = self
            .amendments
            .iter()
            .position(|i| i.id == item_id)
            .ok_or_else(|| LedgerError::not_found("amendment", item_id))?;
        if !self.amendments[idx].is_fresh() {
            return Err(LedgerError::CarriedAmendment {
                statement_id: self.id,
                item_id,
            });
        }
        Ok(self.amendments.remove(idx))
    }

    pub(crate) fn ensure_draft(&self) -> Result<()> {
        if self.finalized {
            return Err(LedgerError::ImmutableStatement {
                statement_id: self.id,
            });
        }
        Ok(())
    }
}
