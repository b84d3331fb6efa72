//! Site addressing: the bit-packed identifier space shared by every cluster
//! participant.
//!
//! A [`SiteId`] packs a 3-bit role into bits 17–19 and a 17-bit ordinal into
//! bits 0–16:
//!
//! ```text
//!  19   17 16                         0
//! +-------+----------------------------+
//! | role  |          ordinal           |
//! +-------+----------------------------+
//! ```
//!
//! Encoding is lossy on overflow: ordinals at or above 2^17 keep only their
//! low 17 bits, and role values outside [`SiteRole`] pass through numerically.
//! Callers that want stricter behaviour run their inputs through a
//! [`SiteValidator`] first.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AddressError;

/// Bit offset of the role field.
pub const ROLE_SHIFT: u32 = 17;

/// Mask applied to ordinals before packing.
pub const ORDINAL_MASK: u32 = (1 << ROLE_SHIFT) - 1;

/// Mask applied to roles before packing.
pub const ROLE_MASK: u8 = 0x7;

/// Exclusive upper bound of the identifier space.
pub const SITE_MAX: u32 = 1 << 20;

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// The category of cluster participant named by a [`SiteId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SiteRole {
    Client = 1,
    Metadata = 2,
    MetadataStorage = 3,
    Directory = 4,
    ObjectStorage = 5,
    AnalyticsConsumer = 6,
    BranchPublisher = 7,
}

impl SiteRole {
    /// All defined roles, in wire order.
    pub const ALL: [SiteRole; 7] = [
        SiteRole::Client,
        SiteRole::Metadata,
        SiteRole::MetadataStorage,
        SiteRole::Directory,
        SiteRole::ObjectStorage,
        SiteRole::AnalyticsConsumer,
        SiteRole::BranchPublisher,
    ];

    /// Returns the numeric value stored in the role field.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a role field value back to a defined role.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Short name used on the shell command line and by the metadata service.
    pub fn short_name(self) -> &'static str {
        match self {
            SiteRole::Client => "client",
            SiteRole::Metadata => "mds",
            SiteRole::MetadataStorage => "mdsl",
            SiteRole::Directory => "r2",
            SiteRole::ObjectStorage => "osd",
            SiteRole::AnalyticsConsumer => "amc",
            SiteRole::BranchPublisher => "bp",
        }
    }
}

impl std::fmt::Display for SiteRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for SiteRole {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.short_name() == lower)
            .ok_or_else(|| AddressError::UnknownRoleName {
                name: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Identifier
// ---------------------------------------------------------------------------

/// A packed (role, ordinal) site identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(u32);

impl SiteId {
    /// Packs a defined role and an ordinal.
    pub fn new(role: SiteRole, ordinal: u64) -> Self {
        Self::encode(role.code(), ordinal)
    }

    /// Packs a raw role value and an ordinal.
    ///
    /// The role is truncated to 3 bits and the ordinal to 17 bits; nothing is
    /// rejected.
    pub fn encode(role: u8, ordinal: u64) -> Self {
        let role = u32::from(role & ROLE_MASK);
        let ordinal = (ordinal & u64::from(ORDINAL_MASK)) as u32;
        Self((role << ROLE_SHIFT) | ordinal)
    }

    /// Wraps an identifier received from the wire or typed by an operator.
    ///
    /// Bits above the 20-bit identifier space are discarded.
    pub fn from_raw(raw: u64) -> Self {
        Self((raw & u64::from(SITE_MAX - 1)) as u32)
    }

    /// Splits the identifier back into its raw role value and ordinal.
    pub fn decode(self) -> (u8, u32) {
        (self.role_code(), self.ordinal())
    }

    /// Raw value of the role field.
    pub fn role_code(self) -> u8 {
        (self.0 >> ROLE_SHIFT) as u8 & ROLE_MASK
    }

    /// The role, if the role field holds a defined value.
    pub fn role(self) -> Option<SiteRole> {
        SiteRole::from_code(self.role_code())
    }

    /// Value of the ordinal field.
    pub fn ordinal(self) -> u32 {
        self.0 & ORDINAL_MASK
    }

    /// Returns the packed integer.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.role() {
            Some(role) => write!(f, "{}.{} ({:#x})", role, self.ordinal(), self.0),
            None => write!(f, "role{}.{} ({:#x})", self.role_code(), self.ordinal(), self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation hook
// ---------------------------------------------------------------------------

/// Decides whether a (role, ordinal) pair may be encoded.
///
/// The codec itself never rejects input. Shell commands pass every
/// operator-supplied pair through the configured validator first.
pub trait SiteValidator: Send + Sync {
    /// Returns `Ok(())` if the pair is acceptable.
    fn check(&self, role: u8, ordinal: u64) -> Result<(), AddressError>;
}

/// Accepts every pair; out-of-range values are truncated by the codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientAddressing;

impl SiteValidator for LenientAddressing {
    fn check(&self, _role: u8, _ordinal: u64) -> Result<(), AddressError> {
        Ok(())
    }
}

/// Rejects undefined roles and ordinals that would be truncated.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictAddressing;

impl SiteValidator for StrictAddressing {
    fn check(&self, role: u8, ordinal: u64) -> Result<(), AddressError> {
        if SiteRole::from_code(role).is_none() {
            return Err(AddressError::UndefinedRole { code: role });
        }
        if ordinal > u64::from(ORDINAL_MASK) {
            return Err(AddressError::OrdinalOutOfRange { ordinal });
        }
        Ok(())
    }
}
