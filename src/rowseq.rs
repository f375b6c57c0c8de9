//! Assembled series data: [`RowSeq`] (one or more merged rows) and [`Span`] (a whole series).

use crate::codec::{base_time, decode_value, qualifier_delta, qualifier_flags, qualifiers, value_len};
use crate::comparator::SeriesKey;
use crate::error::{hex, ScanError};
use crate::types::{Cell, DataPoint, SampleValue, Timestamp, FLAG_BITS, MAX_TIME_DELTA};

/// Contiguous samples of one series, anchored at the base time of the first row merged in.
///
/// Qualifiers are kept relative to `base_time`; rows merged later have their deltas rebased.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSeq {
    key: Vec<u8>,
    base_time: Timestamp,
    qualifiers: Vec<u16>,
    values: Vec<SampleValue>,
    /// `(base_time, first sample index)` of every row merged in, in order.
    rows: Vec<(Timestamp, usize)>,
}

/// A compacted row decoded into its parts.
struct DecodedRow {
    base_time: Timestamp,
    qualifiers: Vec<u16>,
    values: Vec<SampleValue>,
}

fn decode_row(metric_width: usize, row: &Cell) -> Result<DecodedRow, ScanError> {
    let base = base_time(metric_width, &row.key)?;
    let quals = qualifiers(&row.qualifier)?;
    if quals.is_empty() {
        return Err(ScanError::MalformedRow(format!(
            "row {} has no cells",
            hex(&row.key)
        )));
    }

    let mut values = Vec::with_capacity(quals.len());
    let mut off = 0usize;
    let mut prev_delta: Option<u16> = None;
    for &q in &quals {
        let delta = qualifier_delta(q);
        if prev_delta.is_some_and(|p| p >= delta) {
            return Err(ScanError::MalformedRow(format!(
                "row {} has non-increasing delta {}",
                hex(&row.key),
                delta
            )));
        }
        prev_delta = Some(delta);

        let flags = qualifier_flags(q);
        let end = off + value_len(flags);
        let bytes = row.value.get(off..end).ok_or_else(|| {
            ScanError::MalformedRow(format!(
                "row {} value payload truncated at {} bytes",
                hex(&row.key),
                row.value.len()
            ))
        })?;
        values.push(decode_value(flags, bytes)?);
        off = end;
    }
    if off != row.value.len() {
        return Err(ScanError::MalformedRow(format!(
            "row {} carries {} trailing value bytes",
            hex(&row.key),
            row.value.len() - off
        )));
    }

    Ok(DecodedRow {
        base_time: base,
        qualifiers: quals,
        values,
    })
}

impl RowSeq {
    /// Builds a `RowSeq` from a single compacted row.
    pub fn from_row(metric_width: usize, row: &Cell) -> Result<Self, ScanError> {
        let decoded = decode_row(metric_width, row)?;
        Ok(Self {
            key: row.key.clone(),
            base_time: decoded.base_time,
            qualifiers: decoded.qualifiers,
            values: decoded.values,
            rows: vec![(decoded.base_time, 0)],
        })
    }

    /// Row key of the first row in this sequence.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn base_time(&self) -> Timestamp {
        self.base_time
    }

    /// Base times of the rows merged into this sequence.
    pub fn row_base_times(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.rows.iter().map(|&(base, _)| base)
    }

    /// Position of the merged row starting at `base_time`, if any.
    pub(crate) fn row_position(&self, base_time: Timestamp) -> Option<usize> {
        self.rows.iter().position(|&(base, _)| base == base_time)
    }

    /// Drops the row at `pos` and every row merged after it. The first row always stays.
    pub(crate) fn truncate_rows(&mut self, pos: usize) {
        if pos == 0 {
            return;
        }
        if let Some(&(_, start)) = self.rows.get(pos) {
            self.rows.truncate(pos);
            self.qualifiers.truncate(start);
            self.values.truncate(start);
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.qualifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qualifiers.is_empty()
    }

    /// Timestamp of the `i`-th sample. O(1).
    pub fn timestamp(&self, i: usize) -> Timestamp {
        self.base_time + qualifier_delta(self.qualifiers[i]) as Timestamp
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.timestamp(0)
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.timestamp(self.qualifiers.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = DataPoint> + '_ {
        self.qualifiers
            .iter()
            .zip(self.values.iter())
            .map(move |(&q, &value)| DataPoint {
                timestamp: self.base_time + qualifier_delta(q) as Timestamp,
                value,
            })
    }

    /// Appends the samples of `other` to this sequence, rebasing their deltas.
    ///
    /// `other` must belong to the same series, start after this sequence ends, and end
    /// within [`MAX_TIME_DELTA`] of `base_time`. On error `self` is left untouched.
    pub(crate) fn merge(&mut self, other: RowSeq) -> Result<(), ScanError> {
        let time_adj = other.base_time.checked_sub(self.base_time).ok_or_else(|| {
            ScanError::MalformedRow(format!(
                "row {} has base_time={} < {}",
                hex(&other.key),
                other.base_time,
                self.base_time
            ))
        })?;

        let mut rebased = Vec::with_capacity(other.qualifiers.len());
        for q in other.qualifiers {
            let delta = qualifier_delta(q) as u64 + time_adj;
            if delta > MAX_TIME_DELTA {
                return Err(ScanError::MalformedRow(format!(
                    "delta {} of row {} does not fit after rebasing",
                    delta,
                    hex(&other.key)
                )));
            }
            rebased.push(((delta as u16) << FLAG_BITS) | qualifier_flags(q));
        }
        self.rows.push((other.base_time, self.qualifiers.len()));
        self.qualifiers.extend(rebased);
        self.values.extend(other.values);
        Ok(())
    }
}

/// Every sample of one `(metric, tags)` series found by a scan.
#[derive(Debug, Clone)]
pub struct Span {
    key: SeriesKey,
    rows: Vec<RowSeq>,
}

impl Span {
    pub fn new(key: SeriesKey) -> Self {
        Self {
            key,
            rows: Vec::new(),
        }
    }

    /// Row key of the series with its timestamp masked.
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    /// Time-ordered, non-overlapping row sequences.
    pub fn rows(&self) -> &[RowSeq] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<RowSeq> {
        &mut self.rows
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.rows.iter().map(RowSeq::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(RowSeq::is_empty)
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.rows.first().map(RowSeq::first_timestamp)
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.rows.last().map(RowSeq::last_timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = DataPoint> + '_ {
        self.rows.iter().flat_map(|seq| seq.iter())
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.iter().map(|dp| dp.timestamp).collect()
    }
}
