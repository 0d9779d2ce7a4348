use thiserror::Error;

/// Errors raised while building, parsing or analysing the IR.
///
/// Analysis-internal conditions are never fatal; these cover malformed input
/// and misuse of the IR APIs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("Unable to parse IR: {0}, at '{1}'")]
    ParseFailure(String, String),

    #[error("Unable to find block '{0}'")]
    MissingBlock(String),

    #[error("Unable to find function '{0}'")]
    MissingFunction(String),

    #[error("Unable to find value '{0}'")]
    ValueNotFound(String),

    #[error("Unable to read specification file '{0}': {1}")]
    SpecFileUnreadable(String, String),
}
