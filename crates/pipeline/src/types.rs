//! Shared value types: compiler diagnostics and timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Severity level for a [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    /// The stage was dropped.
    Error,
    /// The stage was kept, but not exactly as written.
    Warning,
}

// ---------------------------------------------------------------------------

/// What went wrong with a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Fewer than the four mandatory tokens (kind, id, rid, side).
    InsufficientArguments,
    /// The kind name is not one the branch service understands.
    UnknownKind,
    /// `correlation_id` or `related_id` is not a non-negative 32-bit integer.
    InvalidIdentifier,
    /// The side token is neither `l` nor `r`.
    InvalidSide,
    /// More arguments than the kind's longest form; all defaults were used.
    ExtraArguments,
    /// The container was full; this and any later stages were not compiled.
    CapacityExceeded,
}

impl DiagnosticKind {
    /// Severity implied by this kind.
    pub fn severity(self) -> DiagnosticSeverity {
        match self {
            DiagnosticKind::ExtraArguments => DiagnosticSeverity::Warning,
            _ => DiagnosticSeverity::Error,
        }
    }
}

// ---------------------------------------------------------------------------

/// A per-stage finding recorded by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Zero-based position of the stage within the expression.
    pub stage: usize,

    /// The stage text as written.
    pub text: String,

    /// Classification of the finding.
    pub kind: DiagnosticKind,

    /// Human-readable description.
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn new(
        stage: usize,
        text: impl Into<String>,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            text: text.into(),
            kind,
            message: message.into(),
        }
    }

    /// Severity of this finding.
    pub fn severity(&self) -> DiagnosticSeverity {
        self.kind.severity()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} '{}': {}", self.stage, self.text, self.message)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
