//! Error types for pass configuration
//!
//! Optimizations themselves never fail; only reading and binding the
//! per-pass configuration does.

use dexo_ir::ParseError;
use thiserror::Error;

/// Error raised while configuring a pass
#[derive(Error, Debug)]
pub enum PassError {
    /// The configuration text is not valid TOML
    #[error("Configuration syntax error: {0}")]
    Syntax(#[from] toml::de::Error),

    /// A pass section has the wrong shape or field types
    #[error("Invalid configuration for pass {pass}: {message}")]
    InvalidSection { pass: String, message: String },

    /// A method reference in the configuration cannot be parsed
    #[error("Invalid method {entry:?} in configuration of pass {pass}: {source}")]
    InvalidMethod {
        pass: String,
        entry: String,
        #[source]
        source: ParseError,
    },

    /// The configuration names a pass the manager does not run
    #[error("Configuration for unknown pass: {0}")]
    UnknownPass(String),
}

/// Result type alias using PassError.
pub type Result<T> = std::result::Result<T, PassError>;
