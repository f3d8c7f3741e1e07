//! Budget Ledger
//!
//! Running total of estimated cloud spend, persisted as a single JSON
//! number so it survives restarts. The file is read once when a session
//! opens; from then on the in-memory value is authoritative and every
//! change is written straight back.
//!
//! Amounts are in whatever unit the settings use (cents by default).
//! Only one session is expected per budget file: two sessions sharing a
//! file would race on the read-modify-write in [`BudgetLedger::record`].

use shared::error::ChatError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// `max(ceiling - used, 0)`.
pub fn remaining(ceiling: f64, used: f64) -> f64 {
    (ceiling - used).max(0.0)
}

#[derive(Debug)]
pub struct BudgetLedger {
    path: PathBuf,
    used: f64,
}

impl BudgetLedger {
    /// Open the ledger at `path`, loading whatever total is on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let used = Self::load(&path);
        debug!("budget ledger at {} starts at {}", path.display(), used);
        Self { path, used }
    }

    /// Read the persisted total. A missing, unreadable or corrupt file
    /// counts as zero spent.
    pub fn load(path: &Path) -> f64 {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0.0,
            Err(e) => {
                warn!("could not read budget file {}: {}", path.display(), e);
                return 0.0;
            }
        };
        match serde_json::from_str::<f64>(raw.trim()) {
            Ok(v) if v.is_finite() && v >= 0.0 => v,
            Ok(v) => {
                warn!("ignoring out-of-range budget value {} in {}", v, path.display());
                0.0
            }
            Err(e) => {
                warn!("ignoring corrupt budget file {}: {}", path.display(), e);
                0.0
            }
        }
    }

    pub fn used(&self) -> f64 {
        self.used
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cloud calls are allowed while strictly under the ceiling. The check
    /// happens before a call, so the call that crosses the ceiling still
    /// completes and is charged.
    pub fn allows(&self, ceiling: f64) -> bool {
        self.used < ceiling
    }

    pub fn remaining(&self, ceiling: f64) -> f64 {
        remaining(ceiling, self.used)
    }

    /// Charge `tokens * cost_per_token` and persist the new total.
    pub fn record(&mut self, tokens: u64, cost_per_token: f64) -> f64 {
        let charge = tokens as f64 * cost_per_token;
        if charge.is_finite() && charge > 0.0 {
            self.used += charge;
        }
        if let Err(e) = self.persist() {
            warn!("{}", e);
        }
        info!(tokens, charge, total = self.used, "budget charged");
        self.used
    }

    /// Zero the total and delete the file. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.used = 0.0;
        match fs::remove_file(&self.path) {
            Ok(()) => info!("budget reset, removed {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove budget file {}: {}", self.path.display(), e),
        }
    }

    /// Write to a sibling temp file, then rename over the real one.
    fn persist(&self) -> Result<(), ChatError> {
        let fail = |e: io::Error| {
            ChatError::Persistence(format!(
                "could not write budget file {}: {}",
                self.path.display(),
                e
            ))
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(fail)?;
            }
        }
        let body = serde_json::to_string(&self.used)
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(fail)?;
        fs::rename(&tmp, &self.path).map_err(fail)?;
        Ok(())
    }
}
