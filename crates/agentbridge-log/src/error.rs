use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("log writer task is gone")]
    WriterGone,

    #[error("project metadata for {0} is corrupt: {1}")]
    CorruptMetadata(String, String),
}

pub type Result<T> = std::result::Result<T, LogError>;
