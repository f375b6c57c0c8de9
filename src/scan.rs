//! Scan coordination: turns a query into one range scan and assembles the returned rows
//! into spans.

use crate::assembler::RowAssembler;
use crate::codec::encode_range_bounds;
use crate::comparator::SeriesKey;
use crate::config::ScanConfig;
use crate::downsample::DownsampleFilter;
use crate::error::{hex, ScanError};
use crate::key_pattern::{GroupByValues, KeyPattern};
use crate::rowseq::Span;
use crate::store::{ScanSpec, StoreClient};
use crate::telemetry::{scan_metrics, ScanEvent, StoreTimer};
use crate::types::{Cell, TagPair, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Spans found by a scan, one per series, ordered by series key.
pub type Spans = BTreeMap<SeriesKey, Span>;

/// What to scan: one metric over a time range, optionally constrained by tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanQuery {
    pub metric: Vec<u8>,
    pub start_time: Timestamp,
    /// `None` scans to the end of the metric.
    pub end_time: Option<Timestamp>,
    pub tags: Vec<TagPair>,
    pub group_bys: Vec<Vec<u8>>,
    pub group_by_values: GroupByValues,
    /// Pushed down to the store when set.
    pub downsample: Option<DownsampleFilter>,
}

impl ScanQuery {
    pub fn new(metric: impl Into<Vec<u8>>, start_time: Timestamp) -> Self {
        Self {
            metric: metric.into(),
            start_time,
            ..Self::default()
        }
    }

    pub fn with_end(mut self, end_time: Timestamp) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_tag(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.tags.push(TagPair::new(name, value));
        self
    }

    /// Groups by `name`, any value.
    pub fn with_group_by(mut self, name: impl Into<Vec<u8>>) -> Self {
        self.group_bys.push(name.into());
        self
    }

    /// Groups by `name`, restricted to `values`.
    pub fn with_group_by_values(
        mut self,
        name: impl Into<Vec<u8>>,
        values: impl IntoIterator<Item = Vec<u8>>,
    ) -> Self {
        let name = name.into();
        self.group_by_values
            .insert(name.clone(), values.into_iter().collect());
        self.group_bys.push(name);
        self
    }

    /// Keeps at most one sample every `interval` seconds of each row.
    pub fn with_downsample(mut self, interval: u32) -> Self {
        self.downsample = Some(DownsampleFilter::with_interval(interval));
        self
    }
}

/// Runs span queries against a store.
#[derive(Debug, Clone)]
pub struct SpanScanner {
    store: Arc<dyn StoreClient>,
    config: ScanConfig,
}

impl SpanScanner {
    pub fn new(store: Arc<dyn StoreClient>, config: ScanConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Finds every span of `query.metric` in the queried time range.
    ///
    /// Returns `Ok(None)` when the store returned no row. The time spent waiting on the store
    /// is recorded in the configured latency sink on every exit path.
    ///
    /// # Errors
    /// `InvalidQuery`/`InvariantViolation` for bad queries, `ProtocolViolation` if the store
    /// returns a row of another metric, and any `MalformedRow`, `SeriesKeyMismatch` or
    /// `Store` error raised while scanning. Nothing assembled so far is returned on error.
    pub fn find_spans(&self, query: &ScanQuery) -> Result<Option<Spans>, ScanError> {
        let events = &self.config.event_listener;
        let mut timer = StoreTimer::start(self.config.latency_sink.as_ref());
        match self.scan(query, &mut timer) {
            Ok((spans, rows)) => {
                scan_metrics::record_scanned_rows(rows);
                events.on_event(ScanEvent::ScanCompleted {
                    rows,
                    spans: spans.len(),
                    store_time: timer.waited(),
                });
                Ok(if spans.is_empty() { None } else { Some(spans) })
            }
            Err(e) => {
                events.on_event(ScanEvent::ScanFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn scan(&self, query: &ScanQuery, timer: &mut StoreTimer<'_>) -> Result<(Spans, u64), ScanError> {
        let spec = self.scan_spec(query)?;
        let metric_width = self.config.id_widths.metric_id_width();
        let assembler = RowAssembler::new(metric_width, self.config.event_listener.clone());

        let mut scanner = self.store.open_scanner(&spec)?;
        let mut spans = Spans::new();
        let mut rows = 0u64;
        loop {
            let batch = scanner.next_rows();
            timer.batch_returned();
            let Some(batch) = batch? else {
                break;
            };
            for row in &batch {
                self.add_row(&assembler, &mut spans, &query.metric, row)?;
                rows += 1;
            }
            timer.resume();
        }
        Ok((spans, rows))
    }

    /// Builds the store request for `query`.
    pub fn scan_spec(&self, query: &ScanQuery) -> Result<ScanSpec, ScanError> {
        if let Some(end) = query.end_time {
            if end < query.start_time {
                return Err(ScanError::InvalidQuery(format!(
                    "end time {} is before start time {}",
                    end, query.start_time
                )));
            }
        }
        let widths = self.config.id_widths.widths();
        let (start_key, stop_key) =
            encode_range_bounds(&query.metric, widths.metric, query.start_time, query.end_time)?;

        let key_pattern = if query.tags.is_empty() && query.group_bys.is_empty() {
            None
        } else {
            Some(KeyPattern::build(
                &widths,
                &query.tags,
                &query.group_bys,
                &query.group_by_values,
            )?)
        };

        Ok(ScanSpec {
            table: self.config.table.clone(),
            start_key,
            stop_key,
            family: self.config.family.clone(),
            key_pattern,
            cell_filter: query.downsample.as_ref().map(|f| f.to_bytes().to_vec()),
            max_rows_per_batch: self.config.max_rows_per_batch,
        })
    }

    fn add_row(
        &self,
        assembler: &RowAssembler,
        spans: &mut Spans,
        metric: &[u8],
        row: &[Cell],
    ) -> Result<(), ScanError> {
        if row.is_empty() {
            return Err(ScanError::MalformedRow(
                "store returned a row without cells".to_string(),
            ));
        }
        if let Some(stray) = row.iter().find(|cell| !cell.key.starts_with(metric)) {
            return Err(ScanError::ProtocolViolation(format!(
                "row {} does not belong to metric {}",
                hex(&stray.key),
                hex(metric)
            )));
        }

        let compacted = self.config.compactor.compact(row)?;
        let key = SeriesKey::from_row_key(metric.len(), &compacted.key);
        let span = spans
            .entry(key)
            .or_insert_with_key(|k| Span::new(k.clone()));
        assembler.add_row(span, &compacted)?;
        Ok(())
    }
}
