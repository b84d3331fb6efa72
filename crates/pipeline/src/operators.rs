//! Operator descriptors: one compiled pipeline stage each.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of processing a stage performs.
///
/// Discriminants are the codes the branch service dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum OperatorKind {
    Filter = 0x0001,
    Sum = 0x0002,
    Max = 0x0003,
    Min = 0x0004,
    Knn = 0x0005,
    GroupBy = 0x0006,
    Rank = 0x0007,
    Indexer = 0x0008,
    Count = 0x0009,
    Avg = 0x000a,
    Codec = 0x0100,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 11] = [
        OperatorKind::Filter,
        OperatorKind::Sum,
        OperatorKind::Max,
        OperatorKind::Min,
        OperatorKind::Knn,
        OperatorKind::GroupBy,
        OperatorKind::Rank,
        OperatorKind::Indexer,
        OperatorKind::Count,
        OperatorKind::Avg,
        OperatorKind::Codec,
    ];

    /// Wire code of this kind.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Maps a wire code back to a kind.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }

    /// Name used in pipeline expressions.
    pub fn name(self) -> &'static str {
        match self {
            OperatorKind::Filter => "filter",
            OperatorKind::Sum => "sum",
            OperatorKind::Max => "max",
            OperatorKind::Min => "min",
            OperatorKind::Knn => "knn",
            OperatorKind::GroupBy => "groupby",
            OperatorKind::Rank => "rank",
            OperatorKind::Indexer => "indexer",
            OperatorKind::Count => "count",
            OperatorKind::Avg => "avg",
            OperatorKind::Codec => "codec",
        }
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parses a kind name case-insensitively. The error carries the name as given.
impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

// ---------------------------------------------------------------------------

/// Which half of a two-way data split a stage applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Side {
    Left = 0,
    Right = 1,
}

impl Side {
    /// Wire value of the flag.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Side::Left),
            1 => Some(Side::Right),
            _ => None,
        }
    }

    /// Parses `l` / `r`, case-insensitively.
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("l") {
            Some(Side::Left)
        } else if token.eq_ignore_ascii_case("r") {
            Some(Side::Right)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------

/// One compiled pipeline stage.
///
/// Immutable once built. The parameter blob is the literal `key:value;...`
/// text the branch service parses; it is empty for [`OperatorKind::Rank`] and
/// [`OperatorKind::Codec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    kind: OperatorKind,
    correlation_id: u32,
    related_id: u32,
    side: Side,
    parameters: Vec<u8>,
}

impl OperatorDescriptor {
    pub fn new(
        kind: OperatorKind,
        correlation_id: u32,
        related_id: u32,
        side: Side,
        parameters: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            kind,
            correlation_id,
            related_id,
            side,
            parameters: parameters.into(),
        }
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    /// Input field this stage reads.
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// Field this stage correlates against.
    pub fn related_id(&self) -> u32 {
        self.related_id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Encoded parameter bytes.
    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// Length of the parameter blob as carried on the wire.
    pub fn parameter_len(&self) -> u32 {
        self.parameters.len() as u32
    }

    /// The parameter blob as text, if it is valid UTF-8.
    pub fn parameters_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.parameters).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_codes_round_trip() {
        for kind in OperatorKind::ALL {
            assert_eq!(OperatorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(OperatorKind::Codec.code(), 0x100);
        assert_eq!(OperatorKind::from_code(0x42), None);
    }

    #[test]
    fn kind_names_are_case_insensitive() {
        assert_eq!("GroupBy".parse::<OperatorKind>(), Ok(OperatorKind::GroupBy));
        assert_eq!("bogus".parse::<OperatorKind>(), Err("bogus".to_string()));
    }

    #[test]
    fn side_tokens() {
        assert_eq!(Side::from_token("L"), Some(Side::Left));
        assert_eq!(Side::from_token("r"), Some(Side::Right));
        assert_eq!(Side::from_token("x"), None);
        assert_eq!(Side::from_token("left"), None);
    }
}
