//! Stable error codes carried in `error` frames.
//!
//! This is the single vocabulary every crate's error enum converges into at
//! the router boundary; `agentbridge-log`, `agentbridge-engine`, and the
//! validation module each provide a `From<...> for ErrorCode` impl rather
//! than constructing frames themselves, so the mapping lives in one place.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    InvalidPath,
    ProjectNesting,
    ProjectNotFound,
    ProjectLimit,
    ExecutionTimeout,
    ClaudeNotFound,
    ProcessActive,
    ResourceLimit,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidMessage => "INVALID_MESSAGE",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::ProjectNesting => "PROJECT_NESTING",
            ErrorCode::ProjectNotFound => "PROJECT_NOT_FOUND",
            ErrorCode::ProjectLimit => "PROJECT_LIMIT",
            ErrorCode::ExecutionTimeout => "EXECUTION_TIMEOUT",
            ErrorCode::ClaudeNotFound => "CLAUDE_NOT_FOUND",
            ErrorCode::ProcessActive => "PROCESS_ACTIVE",
            ErrorCode::ResourceLimit => "RESOURCE_LIMIT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_str_matches_wire_vocabulary() {
        assert_eq!(ErrorCode::ProjectNesting.as_str(), "PROJECT_NESTING");
        assert_eq!(ErrorCode::ClaudeNotFound.as_str(), "CLAUDE_NOT_FOUND");
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let value = serde_json::to_value(ErrorCode::ResourceLimit).unwrap();
        assert_eq!(value, "RESOURCE_LIMIT");
    }
}
