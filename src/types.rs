use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Timestamp type (seconds since epoch, stored on 32 bits in row keys).
pub type Timestamp = u64;

/// Number of bytes the base timestamp occupies in a row key.
pub const TIMESTAMP_BYTES: usize = 4;

/// Number of LSBs in a qualifier reserved for flags.
pub const FLAG_BITS: u32 = 4;

/// Mask selecting the flag bits of a qualifier.
pub const FLAGS_MASK: u16 = (1 << FLAG_BITS) - 1;

/// Flag bit marking a floating point value.
pub const FLAG_FLOAT: u16 = 0x8;

/// Mask selecting the encoded value length (minus one) from the flags.
pub const LENGTH_MASK: u16 = 0x7;

/// Largest time delta a qualifier can carry.
pub const MAX_TIME_DELTA: u64 = (1 << (16 - FLAG_BITS)) - 1;

/// Width of a single qualifier in a compacted cell.
pub const QUALIFIER_BYTES: usize = 2;

/// Source of the fixed identifier widths used in row keys.
///
/// Provided by the identifier-allocation tables; widths are constant for the lifetime of a scan.
pub trait IdWidthSource: Debug + Send + Sync + 'static {
    fn metric_id_width(&self) -> usize;
    fn tag_name_width(&self) -> usize;
    fn tag_value_width(&self) -> usize;

    /// Snapshot of all three widths.
    fn widths(&self) -> IdWidths {
        IdWidths {
            metric: self.metric_id_width(),
            tag_name: self.tag_name_width(),
            tag_value: self.tag_value_width(),
        }
    }
}

/// Byte widths of metric, tag name and tag value ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdWidths {
    pub metric: usize,
    pub tag_name: usize,
    pub tag_value: usize,
}

impl IdWidths {
    pub const fn new(metric: usize, tag_name: usize, tag_value: usize) -> Self {
        Self {
            metric,
            tag_name,
            tag_value,
        }
    }

    /// Width of one `(tag_name_id, tag_value_id)` pair.
    #[inline]
    pub fn tag_pair(&self) -> usize {
        self.tag_name + self.tag_value
    }

    /// Offset of the first tag pair in a row key.
    #[inline]
    pub fn tags_offset(&self) -> usize {
        self.metric + TIMESTAMP_BYTES
    }
}

impl Default for IdWidths {
    fn default() -> Self {
        IdWidths::new(3, 3, 3)
    }
}

impl IdWidthSource for IdWidths {
    fn metric_id_width(&self) -> usize {
        self.metric
    }

    fn tag_name_width(&self) -> usize {
        self.tag_name
    }

    fn tag_value_width(&self) -> usize {
        self.tag_value
    }
}

/// A `(tag_name_id, tag_value_id)` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPair {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl TagPair {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// The pair as it appears inside a row key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.name.len() + self.value.len());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.value);
        out
    }
}

/// A single cell as returned by the key-value store.
///
/// A compacted cell packs several 2-byte qualifiers back to back in `qualifier`
/// and their values back to back in `value`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell {
    pub key: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Cell {
    pub fn new(
        key: impl Into<Vec<u8>>,
        family: impl Into<Vec<u8>>,
        qualifier: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            key: key.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
        }
    }
}

/// Decoded sample value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Int(i64),
    Float(f64),
}

/// A single decoded sample of a span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: SampleValue,
}
