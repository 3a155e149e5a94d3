use crate::gateway::DeniedOperation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    /// Raw text failed fence/comment/terminator handling or held more than one statement.
    #[error("{0}")]
    Sanitization(String),

    #[error("invalid SQL: {0}")]
    Parse(String),

    #[error("operation not permitted ({0})")]
    Policy(DeniedOperation),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CopilotError {
    /// True for failures raised by the safety gateway before any database access.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CopilotError::Sanitization(_) | CopilotError::Parse(_) | CopilotError::Policy(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CopilotError>;
