use cilantro_metadata::MetadataError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeLoadError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("check failed: {0}")]
    CheckFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad format: {0}")]
    BadFormat(String),
}

impl TypeLoadError {
    pub fn check(msg: impl Into<String>) -> Self {
        Self::CheckFailed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
