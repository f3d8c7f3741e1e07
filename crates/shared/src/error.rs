//! Error types shared across the workspace.

use std::time::Duration;

/// Failures a chat session can run into.
///
/// Running out of budget is deliberately absent: that is a normal turn
/// outcome, not an error.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A required setting or credential is missing. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("incorrect admin password")]
    AuthFailure,

    /// No admin password is configured, so the gate can never open.
    #[error("admin unlock is not available: no admin password configured")]
    GateUnavailable,

    #[error("admin access required")]
    Locked,

    #[error("cloud service error: {0}")]
    Service(String),

    #[error(transparent)]
    ExternalProcess(#[from] ProcessError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Why a local runner invocation did not produce a reply.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("`{tool}` was not found on this system")]
    NotFound { tool: String },

    #[error("failed to start `{tool}`: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error talking to the local runner: {0}")]
    Io(#[from] std::io::Error),

    #[error("local runner exited with {}: {stderr}", describe_code(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("local runner timed out after {}s", whole_secs(.0))]
    TimedOut(Duration),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (killed by signal)".to_string(),
    }
}

fn whole_secs(d: &Duration) -> u64 {
    d.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_messages() {
        let e = ProcessError::NonZeroExit {
            code: Some(1),
            stderr: "model not found".into(),
        };
        assert_eq!(e.to_string(), "local runner exited with status 1: model not found");

        let e = ProcessError::TimedOut(Duration::from_secs(5));
        assert_eq!(e.to_string(), "local runner timed out after 5s");
    }

    #[test]
    fn test_process_error_converts_to_chat_error() {
        let e: ChatError = ProcessError::NotFound {
            tool: "ollama".into(),
        }
        .into();
        assert!(matches!(e, ChatError::ExternalProcess(_)));
        assert_eq!(e.to_string(), "`ollama` was not found on this system");
    }
}
