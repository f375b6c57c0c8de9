//! Push-down downsample filter evaluated by the store for every cell of a row.
//!
//! Keeps at most one cell per `interval` seconds of qualifier delta. After an inclusion the
//! next rejected cell asks the store to seek straight to the next eligible qualifier
//! instead of stepping through the skipped columns one at a time.

use crate::codec::{encode_qualifier, qualifier_delta};
use crate::error::ScanError;
use crate::types::{Cell, MAX_TIME_DELTA, QUALIFIER_BYTES};
use std::io::{Read, Write};

/// Name identifying the filter type on the wire.
pub const DOWNSAMPLE_FILTER_NAME: &[u8; 36] = b"net.opentsdb.filter.DownsampleFilter";

/// Width of the big-endian interval on the wire.
pub const INTERVAL_BYTES: usize = 4;

/// `[name_len:1][name:36][interval_len:1][interval:4]`.
pub const SERIALIZED_LEN: usize = 1 + 36 + 1 + INTERVAL_BYTES;

/// Per-cell verdict returned to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Return the cell.
    Include,
    /// Drop the cell and step to the next column.
    Skip,
    /// Drop the cell and reposition at [`DownsampleFilter::next_cell_hint`].
    SeekNextUsingHint,
    /// Drop the rest of the row: no further delta can be eligible.
    NextRow,
}

impl FilterDecision {
    /// Every decision, in declaration order.
    pub const ALL: [FilterDecision; 4] = [
        FilterDecision::Include,
        FilterDecision::Skip,
        FilterDecision::SeekNextUsingHint,
        FilterDecision::NextRow,
    ];

    /// Short name used as a metrics label.
    pub fn label(self) -> &'static str {
        match self {
            FilterDecision::Include => "include",
            FilterDecision::Skip => "skip",
            FilterDecision::SeekNextUsingHint => "seek",
            FilterDecision::NextRow => "next_row",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownsampleFilter {
    interval: u32,
    /// Next delta at or above which a cell is eligible.
    skip: u64,
    /// Whether the previous decision was an inclusion.
    jump: bool,
}

impl DownsampleFilter {
    /// Builds a filter from a big-endian interval of 1 to 4 bytes.
    pub fn new(interval_bytes: &[u8]) -> Result<Self, ScanError> {
        if interval_bytes.is_empty() || interval_bytes.len() > INTERVAL_BYTES {
            return Err(ScanError::InvalidFilter(format!(
                "interval must be 1 to {} bytes, got {}",
                INTERVAL_BYTES,
                interval_bytes.len()
            )));
        }
        let interval = interval_bytes
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        Ok(Self::with_interval(interval))
    }

    pub fn with_interval(interval: u32) -> Self {
        Self {
            interval,
            skip: 0,
            jump: false,
        }
    }

    /// Builds a filter from the store's filter-language arguments: one quoted interval.
    pub fn from_arguments(args: &[&[u8]]) -> Result<Self, ScanError> {
        let [arg] = args else {
            return Err(ScanError::InvalidFilter(format!(
                "expected 1 argument, got {}",
                args.len()
            )));
        };
        let unquoted = match arg {
            [b'\'', inner @ .., b'\''] => inner,
            _ => {
                return Err(ScanError::InvalidFilter(
                    "argument must be enclosed in single quotes".to_string(),
                ))
            }
        };
        Self::new(unquoted)
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Forgets the state of the previous row.
    pub fn reset(&mut self) {
        self.skip = 0;
        self.jump = false;
    }

    /// Decides what the store does with `cell`. Cells must be fed in qualifier order and
    /// [`reset`](Self::reset) called at every row boundary.
    pub fn filter_cell(&mut self, cell: &Cell) -> FilterDecision {
        self.decide(&cell.qualifier)
    }

    fn decide(&mut self, qualifier: &[u8]) -> FilterDecision {
        if qualifier.len() < QUALIFIER_BYTES {
            return FilterDecision::Skip;
        }
        let delta = qualifier_delta(u16::from_be_bytes([qualifier[0], qualifier[1]])) as u64;

        if self.skip <= delta {
            self.skip = delta + self.interval as u64;
            self.jump = true;
            FilterDecision::Include
        } else if self.jump {
            self.jump = false;
            if self.skip > MAX_TIME_DELTA {
                FilterDecision::NextRow
            } else {
                FilterDecision::SeekNextUsingHint
            }
        } else {
            FilterDecision::Skip
        }
    }

    /// Smallest cell position carrying a delta of `skip`, in the row and family of `current`.
    ///
    /// `None` when that delta cannot be encoded in a qualifier.
    pub fn next_cell_hint(&self, current: &Cell) -> Option<Cell> {
        if self.skip > MAX_TIME_DELTA {
            return None;
        }
        Some(Cell {
            key: current.key.clone(),
            family: current.family.clone(),
            qualifier: encode_qualifier(self.skip as u16, 0).to_vec(),
            value: Vec::new(),
        })
    }

    /// Fixed-width wire encoding of the filter definition.
    pub fn to_bytes(&self) -> [u8; SERIALIZED_LEN] {
        let mut out = [0u8; SERIALIZED_LEN];
        out[0] = DOWNSAMPLE_FILTER_NAME.len() as u8;
        out[1..37].copy_from_slice(DOWNSAMPLE_FILTER_NAME);
        out[37] = INTERVAL_BYTES as u8;
        out[38..].copy_from_slice(&self.interval.to_be_bytes());
        out
    }

    /// Parses [`to_bytes`](Self::to_bytes) output. The returned filter starts in reset state.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScanError> {
        if bytes.len() != SERIALIZED_LEN {
            return Err(ScanError::InvalidFilter(format!(
                "expected {} bytes, got {}",
                SERIALIZED_LEN,
                bytes.len()
            )));
        }
        if bytes[0] as usize != DOWNSAMPLE_FILTER_NAME.len()
            || &bytes[1..37] != DOWNSAMPLE_FILTER_NAME.as_slice()
        {
            return Err(ScanError::InvalidFilter("unknown filter name".to_string()));
        }
        if bytes[37] as usize != INTERVAL_BYTES {
            return Err(ScanError::InvalidFilter(format!(
                "interval length {} != {}",
                bytes[37], INTERVAL_BYTES
            )));
        }
        Self::new(&bytes[38..])
    }

    /// Writes the interval as a length-prefixed byte array.
    pub fn write_fields<W: Write>(&self, out: &mut W) -> Result<(), ScanError> {
        out.write_all(&[INTERVAL_BYTES as u8])?;
        out.write_all(&self.interval.to_be_bytes())?;
        Ok(())
    }

    /// Reads what [`write_fields`](Self::write_fields) wrote.
    pub fn read_fields<R: Read>(input: &mut R) -> Result<Self, ScanError> {
        let mut len = [0u8; 1];
        input.read_exact(&mut len)?;
        // Lengths above 127 would need a multi-byte prefix; no interval is that long.
        if len[0] as i8 <= 0 || len[0] as usize > INTERVAL_BYTES {
            return Err(ScanError::InvalidFilter(format!(
                "bad interval length prefix {:#04x}",
                len[0]
            )));
        }
        let mut buf = vec![0u8; len[0] as usize];
        input.read_exact(&mut buf)?;
        Self::new(&buf)
    }
}
