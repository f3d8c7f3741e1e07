//! Per-session state: history, budget ledger and admin gate.
//!
//! A `SessionContext` is created when the UI starts a session and dropped
//! when it ends. It is passed explicitly to every operation; nothing here
//! is global.

use chrono::{DateTime, Utc};
use shared::chat::{History, Message};
use shared::error::ChatError;
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::admin::AdminGate;
use crate::budget::BudgetLedger;

pub struct SessionConfig {
    pub budget_file: PathBuf,
    pub admin_secret: Option<Zeroizing<String>>,
}

#[derive(Debug)]
pub struct SessionContext {
    id: Uuid,
    started_at: DateTime<Utc>,
    history: History,
    ledger: BudgetLedger,
    admin: AdminGate,
}

impl SessionContext {
    /// Start a session. The budget file is read here, once.
    pub fn start(config: SessionConfig) -> Self {
        let ledger = BudgetLedger::open(config.budget_file);
        let admin = AdminGate::new(config.admin_secret);
        let session = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            history: History::new(),
            ledger,
            admin,
        };
        info!(
            session = %session.id,
            budget_used = session.ledger.used(),
            budget_file = %session.ledger.path().display(),
            admin_gate = session.admin.is_available(),
            "session started"
        );
        session
    }

    /// Start a session that carries over `history` from one that was lost.
    /// The budget is reloaded from disk and the admin gate starts locked.
    pub fn resume(config: SessionConfig, history: History) -> Self {
        let mut session = Self::start(config);
        session.history = history;
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    pub fn admin(&self) -> &AdminGate {
        &self.admin
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut BudgetLedger {
        &mut self.ledger
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn unlock_admin(&mut self, attempt: &str) -> Result<(), ChatError> {
        self.admin.unlock(attempt)
    }

    /// Clear history and budget. Requires an unlocked admin gate.
    pub fn admin_reset(&mut self) -> Result<(), ChatError> {
        self.admin.require_unlocked()?;
        self.history.clear();
        self.ledger.reset();
        info!(
            session = %self.id,
            session_age_secs = (Utc::now() - self.started_at).num_seconds(),
            "history and budget cleared by admin"
        );
        Ok(())
    }
}
