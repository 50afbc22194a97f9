//! Stateless validation functions composed at the router entry point.
//!
//! Each check is pure and takes exactly what it needs to decide — no shared
//! state, no I/O beyond `Path::canonicalize` (required to resolve `..` and
//! symlinks before the nesting check can mean anything).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use agentbridge_common::ids::ProjectId;

use crate::error_code::ErrorCode;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("path does not exist or is not a directory: {0}")]
    NotADirectory(String),

    #[error("path is outside the configured allow-list: {0}")]
    OutsideAllowedRoots(String),

    #[error("project path overlaps an existing project")]
    Nesting,

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("prompt of {len} chars exceeds the {max} char limit")]
    PromptTooLong { len: usize, max: usize },

    #[error("prompt contains a null byte")]
    PromptHasNulByte,

    #[error("unknown option key: {0}")]
    UnknownOption(String),

    #[error("option {key} has the wrong type, expected {expected}")]
    OptionWrongType { key: String, expected: &'static str },

    #[error("malformed identifier: {0}")]
    MalformedIdentifier(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<&ValidationError> for ErrorCode {
    fn from(err: &ValidationError) -> Self {
        match err {
            ValidationError::NotAbsolute(_)
            | ValidationError::NotADirectory(_)
            | ValidationError::OutsideAllowedRoots(_) => ErrorCode::InvalidPath,
            ValidationError::Nesting => ErrorCode::ProjectNesting,
            _ => ErrorCode::InvalidMessage,
        }
    }
}

/// Checks a raw frame's byte size before it is even parsed as JSON.
pub fn validate_frame_size(bytes: &[u8], max: usize) -> Result<(), ValidationError> {
    if bytes.len() > max {
        return Err(ValidationError::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(())
}

/// Resolves `path` to its canonical form and checks it exists, is a
/// directory, and (if `allowed_roots` is non-empty) falls under one of the
/// configured prefixes.
pub fn validate_path(path: &str, allowed_roots: &[PathBuf]) -> Result<PathBuf, ValidationError> {
    let raw = Path::new(path);
    if !raw.is_absolute() {
        return Err(ValidationError::NotAbsolute(path.to_string()));
    }
    let canonical = raw
        .canonicalize()
        .map_err(|_| ValidationError::NotADirectory(path.to_string()))?;
    if !canonical.is_dir() {
        return Err(ValidationError::NotADirectory(path.to_string()));
    }
    if !allowed_roots.is_empty() && !allowed_roots.iter().any(|root| canonical.starts_with(root)) {
        return Err(ValidationError::OutsideAllowedRoots(path.to_string()));
    }
    Ok(canonical)
}

/// A path may not be an ancestor or descendant of any existing project path.
/// Comparison is string-wise with a trailing separator so `/tmp/p1` and
/// `/tmp/p10` don't falsely collide.
pub fn validate_nesting(new_path: &Path, existing: &[PathBuf]) -> Result<(), ValidationError> {
    let candidate = with_trailing_sep(new_path);
    for other in existing {
        if other == new_path {
            return Err(ValidationError::Nesting);
        }
        let other_sep = with_trailing_sep(other);
        if candidate.starts_with(&other_sep) || other_sep.starts_with(&candidate) {
            return Err(ValidationError::Nesting);
        }
    }
    Ok(())
}

fn with_trailing_sep(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    s
}

pub fn validate_prompt(prompt: &str, max_len: usize) -> Result<(), ValidationError> {
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    if prompt.len() > max_len {
        return Err(ValidationError::PromptTooLong {
            len: prompt.len(),
            max: max_len,
        });
    }
    if prompt.contains('\0') {
        return Err(ValidationError::PromptHasNulByte);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum OptionType {
    Bool,
    String,
    Number,
}

impl OptionType {
    fn matches(self, value: &Value) -> bool {
        match self {
            OptionType::Bool => value.is_boolean(),
            OptionType::String => value.is_string(),
            OptionType::Number => value.is_number(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            OptionType::Bool => "bool",
            OptionType::String => "string",
            OptionType::Number => "number",
        }
    }
}

/// Execution options are accepted only from an explicit whitelist; unknown
/// keys are rejected rather than silently dropped so clients notice typos.
pub fn validate_options(
    options: &serde_json::Map<String, Value>,
    whitelist: &HashMap<&str, OptionType>,
) -> Result<(), ValidationError> {
    for (key, value) in options {
        match whitelist.get(key.as_str()) {
            Some(expected) if expected.matches(value) => {}
            Some(expected) => {
                return Err(ValidationError::OptionWrongType {
                    key: key.clone(),
                    expected: expected.name(),
                })
            }
            None => return Err(ValidationError::UnknownOption(key.clone())),
        }
    }
    Ok(())
}

/// Identifiers on the wire are project ids: fixed-shape, ASCII-safe UUIDs.
pub fn validate_identifier(s: &str) -> Result<ProjectId, ValidationError> {
    ProjectId::parse(s).map_err(|_| ValidationError::MalformedIdentifier(s.to_string()))
}
