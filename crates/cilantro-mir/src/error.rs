use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MirError {
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),

    #[error("no function at address {0:#x}")]
    UnknownFunction(u64),

    #[error("bad operand: {0}")]
    BadOperand(&'static str),

    #[error("unsupported instruction form: {0}")]
    Unsupported(&'static str),

    #[error("call depth limit exceeded")]
    CallDepthExceeded,

    #[error("label {0} has no placement")]
    UnplacedLabel(u32),
}
