pub mod chat;
pub mod error;

pub mod settings {
    use serde::{Deserialize, Serialize};
    use std::path::PathBuf;

    pub const TEMPERATURE_MIN: f32 = 0.0;
    pub const TEMPERATURE_MAX: f32 = 1.0;
    pub const MAX_TOKENS_MIN: u32 = 50;
    pub const MAX_TOKENS_MAX: u32 = 3000;
    pub const MAX_TOKENS_STEP: u32 = 50;

    fn default_true() -> bool {
        true
    }

    /// Spending cap for the cloud model. Amounts are in cents.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct BudgetSettings {
        pub ceiling: f64,
        pub cost_per_token: f64,
        /// Where the running total lives. `None` means the per-user data dir.
        #[serde(default)]
        pub file: Option<PathBuf>,
    }

    impl Default for BudgetSettings {
        fn default() -> Self {
            Self {
                ceiling: 10.0,
                cost_per_token: 0.003,
                file: None,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LocalRunnerSettings {
        /// Executable name or path, invoked as `<tool> run <model> -`.
        pub tool: String,
        pub timeout_secs: u64,
    }

    impl Default for LocalRunnerSettings {
        fn default() -> Self {
            Self {
                tool: "ollama".into(),
                timeout_secs: 120,
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ChatSettings {
        pub cloud_models: Vec<String>, // e.g., ["gpt-4o-mini", "gpt-3.5-turbo"]
        pub local_models: Vec<String>, // e.g., ["llama3.2"]
        pub selected_cloud: String,
        pub selected_local: String,
        pub temperature: f32,
        pub max_tokens: u32,
        #[serde(default = "default_true")]
        pub local_enabled: bool,
        #[serde(default = "default_true")]
        pub stream: bool,
        #[serde(default)]
        pub budget: BudgetSettings,
        #[serde(default)]
        pub local_runner: LocalRunnerSettings,
        #[serde(default)]
        pub openai_base_url: Option<String>,
    }

    impl Default for ChatSettings {
        fn default() -> Self {
            Self {
                cloud_models: vec!["gpt-4o-mini".into(), "gpt-3.5-turbo".into()],
                local_models: vec!["llama3.2".into()],
                selected_cloud: "gpt-4o-mini".into(),
                selected_local: "llama3.2".into(),
                temperature: 0.7,
                max_tokens: 250,
                local_enabled: true,
                stream: true,
                budget: BudgetSettings::default(),
                local_runner: LocalRunnerSettings::default(),
                openai_base_url: None,
            }
        }
    }

    impl ChatSettings {
        /// Pull slider values back into range and make sure the selected
        /// models are members of their lists. Used after loading from disk.
        pub fn normalize(&mut self) {
            self.temperature = clamp_temperature(self.temperature);
            self.max_tokens = clamp_max_tokens(self.max_tokens);
            if self.cloud_models.is_empty() {
                self.cloud_models = ChatSettings::default().cloud_models;
            }
            if self.local_models.is_empty() {
                self.local_models = ChatSettings::default().local_models;
            }
            if !self.cloud_models.contains(&self.selected_cloud) {
                self.selected_cloud = self.cloud_models[0].clone();
            }
            if !self.local_models.contains(&self.selected_local) {
                self.selected_local = self.local_models[0].clone();
            }
        }
    }

    pub fn clamp_temperature(value: f32) -> f32 {
        if value.is_nan() {
            return ChatSettings::default().temperature;
        }
        value.clamp(TEMPERATURE_MIN, TEMPERATURE_MAX)
    }

    /// Clamp to the slider range and snap to the nearest step.
    pub fn clamp_max_tokens(value: u32) -> u32 {
        let clamped = value.clamp(MAX_TOKENS_MIN, MAX_TOKENS_MAX);
        let snapped = ((clamped + MAX_TOKENS_STEP / 2) / MAX_TOKENS_STEP) * MAX_TOKENS_STEP;
        snapped.clamp(MAX_TOKENS_MIN, MAX_TOKENS_MAX)
    }

}

pub mod agent_api {
    use serde::{Deserialize, Serialize};

    /// Wire-level chat message, as sent to the completion service.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ChatMessage {
        pub role: String, // "user" | "assistant"
        pub content: String,
    }

    /// One fragment of a streamed cloud reply.
    #[derive(Debug, Clone, PartialEq)]
    pub enum StreamChunk {
        Text(String),
        /// Token usage reported by the service, usually right before `Done`.
        Usage { total_tokens: u64 },
        Done { stop_reason: Option<String> },
        Error(String),
    }
}
