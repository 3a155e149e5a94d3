pub mod agent_prompts;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod gateway;
pub mod llm;

pub use error::{CopilotError, Result};
