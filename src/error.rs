use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("unreachable: {url} ({reason})")]
    Unreachable { url: String, reason: String },

    #[error("empty result: {0}")]
    EmptyResult(String),

    #[error("resolution interrupted")]
    Interrupted,

    #[error("render failed: {0}")]
    Render(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Unreachable,
    EmptyResult,
    Interrupted,
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::Unreachable { .. } => ErrorKind::Unreachable,
            EngineError::EmptyResult(_) => ErrorKind::EmptyResult,
            EngineError::Interrupted => ErrorKind::Interrupted,
            EngineError::Render(_)
            | EngineError::Json(_)
            | EngineError::Database(_)
            | EngineError::Io(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn unreachable(url: &str, reason: impl Into<String>) -> Self {
        EngineError::Unreachable {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
