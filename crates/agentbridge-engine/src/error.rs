use agentbridge_wire::ErrorCode;
use thiserror::Error;

/// Crate-facing error type for the Project Manager, Subscription Fabric, and
/// Execution Engine. Converts to a wire [`ErrorCode`] at the router
/// boundary; variant names and internal detail never reach a client frame.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("project path is invalid: {0}")]
    InvalidPath(String),

    #[error("project path overlaps an existing project")]
    ProjectNesting,

    #[error("maximum number of projects ({0}) reached")]
    ProjectLimit(usize),

    #[error("project is currently executing")]
    ProcessActive,

    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(std::time::Duration),

    #[error("agent CLI binary not found or not executable: {0}")]
    ClaudeNotFound(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("log error: {0}")]
    Log(#[from] agentbridge_log::LogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<&EngineError> for ErrorCode {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            EngineError::InvalidPath(_) => ErrorCode::InvalidPath,
            EngineError::ProjectNesting => ErrorCode::ProjectNesting,
            EngineError::ProjectLimit(_) => ErrorCode::ProjectLimit,
            EngineError::ProcessActive => ErrorCode::ProcessActive,
            EngineError::ExecutionTimeout(_) => ErrorCode::ExecutionTimeout,
            EngineError::ClaudeNotFound(_) => ErrorCode::ClaudeNotFound,
            EngineError::ResourceLimit(_) => ErrorCode::ResourceLimit,
            EngineError::Log(_) | EngineError::Io(_) | EngineError::Json(_) | EngineError::Internal(_) => {
                ErrorCode::InternalError
            }
        }
    }
}
