//! Core domain for the Strand operator shell.
//!
//! This crate holds the two pieces of the shell with real design content, plus
//! the port traits through which every other command reaches the cluster:
//!
//! - the **branch-pipeline compiler**, which turns an operator-chain expression
//!   such as `filter:1:0:l:png,sum:2:1:r:.*:left` into a bounded
//!   [`PipelineContainer`] and its wire block;
//! - the **site addressing codec**, which packs a role and an ordinal into a
//!   20-bit [`SiteId`].
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! Compilation and encoding are pure and may run concurrently from any number
//! of callers.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`addressing`] | `SiteRole`, `SiteId`, validation hooks |
//! | [`operators`] | `OperatorKind`, `Side`, `OperatorDescriptor` |
//! | [`container`] | `PipelineContainer` and its wire block |
//! | [`compiler`] | Expression compiler and per-kind grammars |
//! | [`ports`] | Remote collaborator traits |
//! | [`identifiers`] | Newtype identifiers (`BranchName`, `FileUuid`, etc.) |
//! | [`types`] | `Diagnostic`, `Timestamp` |
//! | [`errors`] | Error types |

pub mod addressing;
pub mod compiler;
pub mod container;
pub mod errors;
pub mod identifiers;
pub mod operators;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use addressing::{LenientAddressing, SiteId, SiteRole, SiteValidator, StrictAddressing};
pub use compiler::{compile, grammar_for, Compilation, StageGrammar};
pub use container::{PipelineContainer, MAX_STAGES};
pub use errors::{AddressError, CompileError, ServiceError, WireError};
pub use identifiers::{BlockId, BranchName, DatabaseName, FileUuid, KeyPrefix, SessionId};
pub use operators::{OperatorDescriptor, OperatorKind, Side};
pub use ports::{
    BranchCreate, BranchService, MetadataService, ObjectAddress, ObjectStore, SiteEndpoint,
};
pub use types::{Diagnostic, DiagnosticKind, DiagnosticSeverity, Timestamp};
