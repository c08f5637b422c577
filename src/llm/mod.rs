pub mod backend;
pub mod client;
pub mod extract;
pub mod local;
pub mod prompt;

pub use backend::{Completion, InferenceBackend, LlmBackend};
pub use prompt::LlmPrompt;
