//! Session core for the dual-model chat: budget ledger, admin gate,
//! session context and the turn orchestrator.

pub mod admin;
pub mod budget;
pub mod orchestrator;
pub mod session;

pub use admin::AdminGate;
pub use budget::BudgetLedger;
pub use orchestrator::{Orchestrator, PaneOutcome, TurnObserver, TurnOptions, TurnOutcome};
pub use session::{SessionConfig, SessionContext};
