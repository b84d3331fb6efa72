//! Error types for the Strand core domain.
//!
//! Only [`CompileError::NoValidStages`] escapes the compiler; every other
//! compile-time problem is recovered locally and reported as a
//! [`Diagnostic`](crate::Diagnostic). [`ServiceError`] is the error type of the
//! port traits in [`crate::ports`] and is what the shell prints when a remote
//! call fails.

use thiserror::Error;

use crate::types::Diagnostic;

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// Failure signal of [`compile`](crate::compile).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// A non-empty expression produced no valid stage.
    ///
    /// Distinct from empty input, which compiles to an empty container.
    #[error("no valid stage in pipeline expression ({} diagnostic(s))", .diagnostics.len())]
    NoValidStages {
        /// Every per-stage diagnostic recorded while compiling.
        diagnostics: Vec<Diagnostic>,
    },
}

// ---------------------------------------------------------------------------
// Wire block
// ---------------------------------------------------------------------------

/// Errors produced while parsing a pipeline wire block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The block ended before a field or payload was complete.
    #[error("wire block truncated at offset {offset}: need {needed} more byte(s)")]
    Truncated { offset: usize, needed: usize },

    /// The count field exceeds the container capacity.
    #[error("wire block declares {count} stages, capacity is {capacity}")]
    TooManyStages { count: u32, capacity: usize },

    /// A record carries a kind code the branch service does not define.
    #[error("unknown operator kind code {code:#x} in record {index}")]
    UnknownKind { index: usize, code: u32 },

    /// A record carries a side flag other than 0 or 1.
    #[error("invalid side flag {value} in record {index}")]
    InvalidSide { index: usize, value: u32 },

    /// Bytes remain after the last declared record.
    #[error("{remaining} trailing byte(s) after last record")]
    TrailingBytes { remaining: usize },
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Errors raised by site validators and role-name parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("unknown site role '{name}'")]
    UnknownRoleName { name: String },

    #[error("role code {code} is not a defined site role")]
    UndefinedRole { code: u8 },

    #[error("ordinal {ordinal} does not fit in 17 bits")]
    OrdinalOutOfRange { ordinal: u64 },
}

// ---------------------------------------------------------------------------
// Remote collaborators
// ---------------------------------------------------------------------------

/// Errors returned by the remote-service ports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The remote call returned a non-zero status code.
    #[error("{call}() failed w/ {code}")]
    Remote {
        /// Name of the remote call.
        call: &'static str,
        /// Status code returned by the collaborator (negative errno style).
        code: i32,
    },

    /// The collaborator rejected the arguments (`-EINVAL` on the native runtime).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named branch, site, or object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator does not implement this call.
    #[error("{0} is not supported by this runtime")]
    Unsupported(&'static str),

    /// A pipeline wire block could not be parsed.
    #[error(transparent)]
    Wire(#[from] WireError),
}
