//! Newtype domain identifiers.
//!
//! Every value the shell forwards to a remote collaborator as an identity is
//! represented as a distinct newtype. This prevents accidentally passing a
//! [`BlockId`] where a [`FileUuid`] is expected even though both are `u64` on
//! the wire.
//!
//! Site identifiers are not here: they carry a bit layout and live in
//! [`crate::addressing`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (runtime-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — object addressing
// ---------------------------------------------------------------------------

u64_id! {
    /// Identifies a file in the metadata service's namespace.
    ///
    /// Together with a [`BlockId`] it names one data object on an
    /// object-storage site.
    FileUuid
}

u64_id! {
    /// Identifies one block of a file.
    BlockId
}

// ---------------------------------------------------------------------------
// Identifiers — branch service names
// ---------------------------------------------------------------------------

string_id! {
    /// Name of a branch registered with the branch service.
    BranchName
}

string_id! {
    /// Database an INDEXER stage writes to and `search` reads from.
    DatabaseName
}

string_id! {
    /// Key prefix within a [`DatabaseName`].
    KeyPrefix
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies one interactive shell session.
///
/// Generated fresh for every shell start; attached to the session's tracing
/// span so all calls issued from one session can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_reject_empty_values() {
        assert!(BranchName::new("").is_none());
        assert_eq!(BranchName::new("png-feed").unwrap().as_str(), "png-feed");
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new_random(), SessionId::new_random());
    }
}
