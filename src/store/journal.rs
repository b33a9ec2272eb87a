/*!
 * Budget Journal
 * Per-tenant append-only transaction log for spend auditability
 *
 * One JSONL file per tenant; rows are never rewritten. Replay returns the
 * full history in append order.
 */

use crate::core::errors::OrchestratorError;
use crate::core::types::{CostCents, TenantId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// One appended budget transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JournalEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tier: String,
    pub delta_cents: CostCents,
    pub resulting_total_cents: CostCents,
}

/// Append-only budget transaction log
pub struct BudgetJournal {
    dir: PathBuf,
    /// Serializes appends so concurrent charges interleave at row boundaries
    write_lock: Mutex<()>,
}

impl BudgetJournal {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, tenant: TenantId) -> PathBuf {
        self.dir.join(format!("{}.jsonl", tenant.simple()))
    }

    /// Append one row to the tenant's log
    pub fn append(&self, tenant: TenantId, entry: &JournalEntry) -> Result<(), OrchestratorError> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(tenant))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Full history for a tenant in append order; empty if never charged
    pub fn replay(&self, tenant: TenantId) -> Result<Vec<JournalEntry>, OrchestratorError> {
        let path = self.path_for(tenant);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}
