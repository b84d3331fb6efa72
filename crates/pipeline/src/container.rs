//! The bounded pipeline container and its wire block.
//!
//! ## Wire layout
//!
//! All integers are little-endian `u32`.
//!
//! ```text
//! count
//! repeated `count` times:
//!     kind | len | correlation_id | related_id | side | <len parameter bytes>
//! ```
//!
//! The branch service is the only consumer that interprets `kind` and the
//! parameter bytes; the container treats them as opaque.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::WireError;
use crate::operators::{OperatorDescriptor, OperatorKind, Side};

/// Maximum number of stages in one pipeline.
pub const MAX_STAGES: usize = 10;

const HEADER_LEN: usize = 4;
const RECORD_HEADER_LEN: usize = 5 * 4;

/// An ordered, bounded sequence of compiled stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContainer {
    stages: Vec<OperatorDescriptor>,
}

impl PipelineContainer {
    pub fn new() -> Self {
        Self {
            stages: Vec::with_capacity(MAX_STAGES),
        }
    }

    /// Appends a stage.
    ///
    /// Returns `false` and leaves the container unchanged if it already holds
    /// [`MAX_STAGES`] stages.
    pub fn append(&mut self, descriptor: OperatorDescriptor) -> bool {
        if self.is_full() {
            warn!(
                kind = %descriptor.kind(),
                capacity = MAX_STAGES,
                "pipeline container full, dropping stage"
            );
            return false;
        }
        self.stages.push(descriptor);
        true
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.stages.len() >= MAX_STAGES
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[OperatorDescriptor] {
        &self.stages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OperatorDescriptor> {
        self.stages.iter()
    }

    /// Serialises the container into the block handed to the branch service.
    pub fn to_wire_blob(&self) -> Vec<u8> {
        let payload: usize = self.stages.iter().map(|s| s.parameters().len()).sum();
        let mut out =
            Vec::with_capacity(HEADER_LEN + self.stages.len() * RECORD_HEADER_LEN + payload);

        out.extend_from_slice(&(self.stages.len() as u32).to_le_bytes());
        for stage in &self.stages {
            for field in [
                stage.kind().code(),
                stage.parameter_len(),
                stage.correlation_id(),
                stage.related_id(),
                stage.side().code(),
            ] {
                out.extend_from_slice(&field.to_le_bytes());
            }
            out.extend_from_slice(stage.parameters());
        }
        out
    }

    /// Parses a block produced by [`to_wire_blob`](Self::to_wire_blob).
    pub fn from_wire_blob(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader { bytes, offset: 0 };

        let count = reader.u32()?;
        if count as usize > MAX_STAGES {
            return Err(WireError::TooManyStages {
                count,
                capacity: MAX_STAGES,
            });
        }

        let mut container = Self::new();
        for index in 0..count as usize {
            let code = reader.u32()?;
            let len = reader.u32()?;
            let correlation_id = reader.u32()?;
            let related_id = reader.u32()?;
            let side = reader.u32()?;

            let kind =
                OperatorKind::from_code(code).ok_or(WireError::UnknownKind { index, code })?;
            let side =
                Side::from_code(side).ok_or(WireError::InvalidSide { index, value: side })?;
            let parameters = reader.take(len as usize)?;

            container.stages.push(OperatorDescriptor::new(
                kind,
                correlation_id,
                related_id,
                side,
                parameters,
            ));
        }

        let remaining = bytes.len() - reader.offset;
        if remaining != 0 {
            return Err(WireError::TrailingBytes { remaining });
        }
        Ok(container)
    }
}

impl<'a> IntoIterator for &'a PipelineContainer {
    type Item = &'a OperatorDescriptor;
    type IntoIter = std::slice::Iter<'a, OperatorDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let available = self.bytes.len() - self.offset;
        if available < n {
            return Err(WireError::Truncated {
                offset: self.offset,
                needed: n - available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rank(id: u32) -> OperatorDescriptor {
        OperatorDescriptor::new(OperatorKind::Rank, id, 0, Side::Left, Vec::new())
    }

    #[test]
    fn append_stops_at_capacity() {
        let mut container = PipelineContainer::new();
        for i in 0..MAX_STAGES as u32 {
            assert!(container.append(rank(i)));
        }
        assert!(container.is_full());
        assert!(!container.append(rank(99)));
        assert_eq!(container.len(), MAX_STAGES);
        assert_eq!(container.stages().last().unwrap().correlation_id(), 9);
    }

    #[test]
    fn empty_container_is_just_a_count() {
        let blob = PipelineContainer::new().to_wire_blob();
        assert_eq!(blob, vec![0, 0, 0, 0]);
        assert!(PipelineContainer::from_wire_blob(&blob).unwrap().is_empty());
    }

    #[test]
    fn record_layout_is_little_endian_with_inline_payload() {
        let mut container = PipelineContainer::new();
        container.append(OperatorDescriptor::new(
            OperatorKind::Codec,
            2,
            3,
            Side::Right,
            b"ab".to_vec(),
        ));
        let blob = container.to_wire_blob();
        assert_eq!(
            blob,
            vec![
                1, 0, 0, 0, // count
                0, 1, 0, 0, // kind 0x100
                2, 0, 0, 0, // len
                2, 0, 0, 0, // correlation_id
                3, 0, 0, 0, // related_id
                1, 0, 0, 0, // side
                b'a', b'b',
            ]
        );
    }

    #[test]
    fn parse_rejects_malformed_blocks() {
        assert!(matches!(
            PipelineContainer::from_wire_blob(&[1, 0]),
            Err(WireError::Truncated { offset: 0, needed: 2 })
        ));
        assert!(matches!(
            PipelineContainer::from_wire_blob(&11u32.to_le_bytes()),
            Err(WireError::TooManyStages { count: 11, .. })
        ));

        let mut container = PipelineContainer::new();
        container.append(OperatorDescriptor::new(
            OperatorKind::Filter,
            1,
            0,
            Side::Left,
            b"rule:.*".to_vec(),
        ));
        let good = container.to_wire_blob();

        let mut bad_kind = good.clone();
        bad_kind[4..8].copy_from_slice(&0x42u32.to_le_bytes());
        assert!(matches!(
            PipelineContainer::from_wire_blob(&bad_kind),
            Err(WireError::UnknownKind { index: 0, code: 0x42 })
        ));

        let mut bad_side = good.clone();
        bad_side[20..24].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            PipelineContainer::from_wire_blob(&bad_side),
            Err(WireError::InvalidSide { index: 0, value: 7 })
        ));

        let mut trailing = good.clone();
        trailing.push(0);
        assert!(matches!(
            PipelineContainer::from_wire_blob(&trailing),
            Err(WireError::TrailingBytes { remaining: 1 })
        ));

        let short_payload = &good[..good.len() - 3];
        assert!(matches!(
            PipelineContainer::from_wire_blob(short_payload),
            Err(WireError::Truncated { needed: 3, .. })
        ));
    }
}
