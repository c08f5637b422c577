pub mod benchmark;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod llm;
pub mod logger;
pub mod persistence;
pub mod pipeline;
pub mod state;
pub mod worker;

pub use config::RunConfig;
pub use coordinator::{Coordinator, CoordinatorStats};
pub use pipeline::{run_pipeline, PipelineResult};
