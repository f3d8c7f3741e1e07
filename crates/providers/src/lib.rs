pub mod backend;
pub mod ollama;
pub mod openai;
pub mod sse;

pub use backend::{CloudBackend, CloudReply, CloudRequest, LocalBackend, LocalStatus};
pub use ollama::OllamaRunner;
pub use openai::OpenAIClient;
