//! Contracts of the key-value store collaborators, plus in-memory implementations.
//!
//! [`MemStore`] is a sorted, single-table store that evaluates key patterns and the
//! downsample push-down filter the way a remote region server would.

use crate::codec::{encode_sample, qualifier_delta, qualifier_flags, qualifiers, row_key, value_len};
use crate::downsample::{DownsampleFilter, FilterDecision};
use crate::error::{hex, ScanError};
use crate::key_pattern::KeyPattern;
use crate::telemetry::scan_metrics;
use crate::types::{Cell, IdWidths, SampleValue, TagPair, Timestamp, QUALIFIER_BYTES};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::ops::Bound;
use std::sync::RwLock;

/// Seconds covered by one row when writing samples into a [`MemStore`].
pub const ROW_SPAN: Timestamp = 3600;

/// Everything the store needs to open a scanner.
#[derive(Debug, Clone)]
pub struct ScanSpec {
    pub table: String,
    /// Inclusive.
    pub start_key: Vec<u8>,
    /// Exclusive.
    pub stop_key: Vec<u8>,
    pub family: Vec<u8>,
    /// Row key regexp evaluated server-side.
    pub key_pattern: Option<KeyPattern>,
    /// Serialized [`DownsampleFilter`] evaluated server-side on every cell.
    pub cell_filter: Option<Vec<u8>>,
    pub max_rows_per_batch: usize,
}

/// Opens range scans against the key-value store.
pub trait StoreClient: Debug + Send + Sync {
    fn open_scanner(&self, spec: &ScanSpec) -> Result<Box<dyn RowScanner + '_>, ScanError>;
}

/// Batched iteration over the rows of a scan, in key order.
pub trait RowScanner {
    /// Next batch of rows, each a non-empty list of the row's cells in qualifier order.
    /// `None` once the scan is exhausted.
    fn next_rows(&mut self) -> Result<Option<Vec<Vec<Cell>>>, ScanError>;
}

/// Combines the raw cells of one row into a single compacted cell.
pub trait RowCompactor: Debug + Send + Sync + 'static {
    fn compact(&self, row: &[Cell]) -> Result<Cell, ScanError>;
}

/// Sorts every sample of a row by delta and concatenates qualifiers and values.
///
/// A row made of a single cell is returned as is, so compacting twice is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct SortingCompactor;

impl RowCompactor for SortingCompactor {
    fn compact(&self, row: &[Cell]) -> Result<Cell, ScanError> {
        let first = match row {
            [] => return Err(ScanError::MalformedRow("row without cells".to_string())),
            [only] => return Ok(only.clone()),
            [first, ..] => first,
        };

        let mut samples: Vec<(u16, &[u8])> = Vec::new();
        for cell in row {
            let mut off = 0usize;
            for q in qualifiers(&cell.qualifier)? {
                let end = off + value_len(qualifier_flags(q));
                let value = cell.value.get(off..end).ok_or_else(|| {
                    ScanError::MalformedRow(format!(
                        "cell of row {} has a truncated value",
                        hex(&cell.key)
                    ))
                })?;
                samples.push((q, value));
                off = end;
            }
        }
        samples.sort_by_key(|&(q, _)| qualifier_delta(q));

        let mut qualifier = Vec::with_capacity(samples.len() * QUALIFIER_BYTES);
        let mut value = Vec::new();
        let mut prev: Option<(u16, &[u8])> = None;
        for (q, v) in samples {
            if let Some((pq, pv)) = prev {
                if qualifier_delta(pq) == qualifier_delta(q) {
                    if pq == q && pv == v {
                        continue;
                    }
                    return Err(ScanError::MalformedRow(format!(
                        "row {} has conflicting samples at delta {}",
                        hex(&first.key),
                        qualifier_delta(q)
                    )));
                }
            }
            qualifier.extend_from_slice(&q.to_be_bytes());
            value.extend_from_slice(v);
            prev = Some((q, v));
        }

        Ok(Cell {
            key: first.key.clone(),
            family: first.family.clone(),
            qualifier,
            value,
        })
    }
}

type Row = BTreeMap<(Vec<u8>, Vec<u8>), Vec<u8>>;

/// In-memory sorted store holding one table.
#[derive(Debug)]
pub struct MemStore {
    table: String,
    rows: RwLock<BTreeMap<Vec<u8>, Row>>,
}

impl MemStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Stores a cell, overwriting any cell at the same position.
    pub fn put(&self, cell: Cell) -> Result<(), ScanError> {
        let mut rows = self.rows.write()?;
        rows.entry(cell.key)
            .or_default()
            .insert((cell.family, cell.qualifier), cell.value);
        Ok(())
    }

    /// Writes one sample into the row covering `timestamp`.
    pub fn put_sample(
        &self,
        widths: &IdWidths,
        family: &[u8],
        metric: &[u8],
        tags: &[TagPair],
        timestamp: Timestamp,
        value: SampleValue,
    ) -> Result<(), ScanError> {
        let base = timestamp - timestamp % ROW_SPAN;
        let key = row_key(widths, metric, base, tags)?;
        let (qualifier, value) = encode_sample((timestamp - base) as u16, value);
        self.put(Cell {
            key,
            family: family.to_vec(),
            qualifier: qualifier.to_vec(),
            value,
        })
    }

    /// Number of stored rows.
    pub fn row_count(&self) -> Result<usize, ScanError> {
        Ok(self.rows.read()?.len())
    }
}

impl StoreClient for MemStore {
    fn open_scanner(&self, spec: &ScanSpec) -> Result<Box<dyn RowScanner + '_>, ScanError> {
        if spec.table != self.table {
            return Err(ScanError::Store(format!("no such table: {}", spec.table)));
        }
        let regex = spec.key_pattern.as_ref().map(KeyPattern::to_regex).transpose()?;
        let mut filter = spec
            .cell_filter
            .as_deref()
            .map(DownsampleFilter::from_bytes)
            .transpose()?;

        let rows = self.rows.read()?;
        let mut matched: Vec<Vec<Cell>> = Vec::new();
        if spec.start_key < spec.stop_key {
            let range = rows.range::<Vec<u8>, _>((
                Bound::Included(&spec.start_key),
                Bound::Excluded(&spec.stop_key),
            ));
            for (key, cells) in range {
                if regex.as_ref().is_some_and(|re| !re.is_match(key)) {
                    continue;
                }
                let row = scan_row(key, cells, &spec.family, filter.as_mut());
                if !row.is_empty() {
                    matched.push(row);
                }
            }
        }

        let batch = spec.max_rows_per_batch.max(1);
        let mut batches: VecDeque<Vec<Vec<Cell>>> = VecDeque::new();
        let mut it = matched.into_iter().peekable();
        while it.peek().is_some() {
            batches.push_back(it.by_ref().take(batch).collect());
        }
        Ok(Box::new(MemScanner { batches }))
    }
}

/// Cells of one row in `family`, after the push-down filter (if any).
/// Downsample decisions taken within one row, flushed to metrics when the row is done.
#[derive(Debug, Default)]
struct DecisionTally([u64; 4]);

impl DecisionTally {
    fn count(&mut self, decision: FilterDecision) {
        self.0[decision as usize] += 1;
    }

    fn flush(self) {
        for (decision, cells) in FilterDecision::ALL.into_iter().zip(self.0) {
            scan_metrics::record_downsample_decisions(decision.label(), cells);
        }
    }
}

fn scan_row(
    key: &[u8],
    cells: &Row,
    family: &[u8],
    mut filter: Option<&mut DownsampleFilter>,
) -> Vec<Cell> {
    if let Some(f) = filter.as_deref_mut() {
        f.reset();
    }
    let mut out = Vec::new();
    let mut tally = DecisionTally::default();
    let mut seek_to: Option<Vec<u8>> = None;
    for ((fam, qualifier), value) in cells {
        if fam.as_slice() != family {
            continue;
        }
        if seek_to.as_ref().is_some_and(|hint| qualifier < hint) {
            continue;
        }
        seek_to = None;
        let cell = Cell {
            key: key.to_vec(),
            family: fam.clone(),
            qualifier: qualifier.clone(),
            value: value.clone(),
        };
        let Some(f) = filter.as_deref_mut() else {
            out.push(cell);
            continue;
        };
        let decision = f.filter_cell(&cell);
        tally.count(decision);
        match decision {
            FilterDecision::Include => out.push(cell),
            FilterDecision::Skip => {}
            FilterDecision::SeekNextUsingHint => {
                seek_to = f.next_cell_hint(&cell).map(|hint| hint.qualifier);
            }
            FilterDecision::NextRow => break,
        }
    }
    tally.flush();
    out
}

#[derive(Debug)]
struct MemScanner {
    batches: VecDeque<Vec<Vec<Cell>>>,
}

impl RowScanner for MemScanner {
    fn next_rows(&mut self) -> Result<Option<Vec<Vec<Cell>>>, ScanError> {
        Ok(self.batches.pop_front())
    }
}
