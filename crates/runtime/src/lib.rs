//! Strand runtime adapters.
//!
//! Implements the port traits of the [`pipeline`] crate. The only adapter
//! today is [`LoopbackRuntime`], an in-process stand-in for the native
//! cluster runtime used by the shell's `loopback` backend and by tests.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** State keeping, call journaling, and wire-block parsing
//! on the receiving side live here. The [`pipeline`] crate sees only the
//! [`pipeline::BranchService`], [`pipeline::MetadataService`] and
//! [`pipeline::ObjectStore`] traits.

pub mod loopback;

pub use loopback::{CallRecord, LoopbackRuntime, SiteState, MAX_OBJECT_SIZE};
