use cilantro_metadata::MetadataError;
use cilantro_mir::MirError;
use cilantro_types::TypeLoadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JitError {
    /// A verification or invariant failure; aborts the current method's JIT
    /// and prevents publication of its function pointer.
    #[error("check failed: {0}")]
    CheckFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    TypeLoad(#[from] TypeLoadError),

    #[error(transparent)]
    Mir(#[from] MirError),
}

impl JitError {
    pub fn check(msg: impl Into<String>) -> Self {
        Self::CheckFailed(msg.into())
    }
}

/// Verification check in the translator: logs and aborts the method on
/// failure, like a `CHECK` in the original taxonomy.
macro_rules! jit_check {
    ($cond:expr, $($arg:tt)*) => {
        if !($cond) {
            tracing::debug!("jit check failed: {}", format_args!($($arg)*));
            return Err($crate::JitError::check(format!($($arg)*)));
        }
    };
}

macro_rules! jit_bail {
    ($($arg:tt)*) => {{
        tracing::debug!("jit check failed: {}", format_args!($($arg)*));
        return Err($crate::JitError::check(format!($($arg)*)));
    }};
}

pub(crate) use jit_bail;
pub(crate) use jit_check;
