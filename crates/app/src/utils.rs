//! Formatting helpers for the chat window.

use shared::error::ChatError;
use std::time::Duration;

/// Shown at the end of a reply that is still streaming in.
pub const STREAM_CURSOR: &str = "▌";

pub fn format_latency(latency: Duration) -> String {
    format!("⏱ {:.2}s", latency.as_secs_f64())
}

/// Pane text for a failed backend call.
pub fn format_error_message(error: &ChatError) -> String {
    match error {
        ChatError::ExternalProcess(e) => format!("Local model error: {}", e),
        other => format!("Cloud model error: {}", other),
    }
}

/// Budget caption, in cents.
pub fn format_budget(used: f64, ceiling: f64) -> String {
    let remaining = (ceiling - used).max(0.0);
    format!(
        "Used {:.3}¢ of {:.2}¢ ({:.3}¢ left)",
        used, ceiling, remaining
    )
}

/// Fraction of the budget spent, for the progress bar.
pub fn budget_fraction(used: f64, ceiling: f64) -> f32 {
    if ceiling <= 0.0 {
        return 1.0;
    }
    (used / ceiling).clamp(0.0, 1.0) as f32
}
