//! Error types for parsing type, field and method descriptors

use thiserror::Error;

/// Error returned when a descriptor string is malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Not a valid type descriptor (`I`, `J`, `Lpkg/Cls;`, `[I`, ...)
    #[error("invalid type descriptor: {0:?}")]
    InvalidType(String),

    /// A member reference lacks the `.` between owner and name
    #[error("missing '.' between owner and member name in {0:?}")]
    MissingOwner(String),

    /// A member reference lacks the `:` between name and signature
    #[error("missing ':' between member name and signature in {0:?}")]
    MissingSignature(String),

    /// A member name is empty
    #[error("empty member name in {0:?}")]
    EmptyName(String),

    /// A method prototype is not of the form `(Args)Ret`
    #[error("invalid method prototype: {0:?}")]
    InvalidProto(String),
}

/// Result type alias for descriptor parsing
pub type ParseResult<T> = std::result::Result<T, ParseError>;
