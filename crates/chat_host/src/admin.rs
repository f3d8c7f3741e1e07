//! Admin gate guarding the destructive reset.
//!
//! Two states, locked and unlocked. The only transition is locked to
//! unlocked on a correct password; nothing locks it again before the
//! process exits. With no password configured the gate stays shut.

use shared::error::ChatError;
use tracing::{info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Locked,
    Unlocked,
}

pub struct AdminGate {
    secret: Option<Zeroizing<String>>,
    state: GateState,
}

impl AdminGate {
    /// An empty secret is treated the same as no secret.
    pub fn new(secret: Option<Zeroizing<String>>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            state: GateState::Locked,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Whether unlocking is possible at all.
    pub fn is_available(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == GateState::Unlocked
    }

    /// Try the submitted password. A wrong guess never re-locks a gate
    /// that is already open.
    pub fn unlock(&mut self, attempt: &str) -> Result<(), ChatError> {
        let Some(secret) = &self.secret else {
            warn!("admin unlock attempted but no admin password is configured");
            return Err(ChatError::GateUnavailable);
        };
        if constant_time_eq(secret.as_bytes(), attempt.as_bytes()) {
            if self.state == GateState::Locked {
                info!("admin gate unlocked");
            }
            self.state = GateState::Unlocked;
            Ok(())
        } else {
            warn!("admin unlock failed");
            Err(ChatError::AuthFailure)
        }
    }

    pub fn require_unlocked(&self) -> Result<(), ChatError> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(ChatError::Locked)
        }
    }
}

impl std::fmt::Debug for AdminGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGate")
            .field("configured", &self.secret.is_some())
            .field("state", &self.state)
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
