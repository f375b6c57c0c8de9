//! Stitches compacted rows, delivered in key order, into the row sequences of a span.

use crate::codec::{can_time_delta_fit, last_timestamp_in_row};
use crate::error::{hex, ScanError};
use crate::rowseq::{RowSeq, Span};
use crate::telemetry::{scan_metrics, ScanEvent, ScanEventListener};
use crate::types::{Cell, TIMESTAMP_BYTES};
use std::sync::Arc;

/// What [`RowAssembler::add_row`] did with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowDisposition {
    /// Started a new row sequence.
    Appended,
    /// Merged into the last row sequence.
    Merged,
    /// A row already merged into the last row sequence came again. The sequence was cut back
    /// to the row before it and the row merged anew.
    Redelivered,
    /// Dropped: the row does not start after the end of the span.
    DroppedOutOfOrder,
}

#[derive(Debug, Clone)]
pub struct RowAssembler {
    metric_width: usize,
    events: Arc<dyn ScanEventListener>,
}

impl RowAssembler {
    pub fn new(metric_width: usize, events: Arc<dyn ScanEventListener>) -> Self {
        Self {
            metric_width,
            events,
        }
    }

    /// Appends a compacted row to `span`.
    ///
    /// # Errors
    /// `SeriesKeyMismatch` if the row belongs to another series, `MalformedRow` if it cannot
    /// be decoded. Out-of-order rows are not errors: they are dropped and reported as a
    /// [`ScanEvent::RowOutOfOrder`].
    pub fn add_row(&self, span: &mut Span, row: &Cell) -> Result<RowDisposition, ScanError> {
        let mw = self.metric_width;
        let rows = span.rows_mut();
        let seq = RowSeq::from_row(mw, row)?;

        let Some(last) = rows.last_mut() else {
            rows.push(seq);
            return Ok(RowDisposition::Appended);
        };
        self.check_same_series(last.key(), &row.key)?;

        if let Some(pos) = last.row_position(seq.base_time()) {
            // The store re-opened its scanner at a row already merged into the last sequence.
            self.events.on_event(ScanEvent::RowRedelivered {
                series: hex(&row.key),
                base_time: seq.base_time(),
            });
            if pos == 0 {
                *last = seq;
                return Ok(RowDisposition::Redelivered);
            }
            last.truncate_rows(pos);
            let row_end = last_timestamp_in_row(mw, row)?;
            if can_time_delta_fit(row_end as i64 - last.base_time() as i64) {
                last.merge(seq)?;
            } else {
                rows.push(seq);
            }
            return Ok(RowDisposition::Redelivered);
        }

        let last_ts = last.last_timestamp();
        if seq.first_timestamp() <= last_ts {
            self.events.on_event(ScanEvent::RowOutOfOrder {
                series: hex(&row.key),
                last_timestamp: last_ts,
                first_timestamp: seq.first_timestamp(),
            });
            scan_metrics::record_out_of_order_row();
            return Ok(RowDisposition::DroppedOutOfOrder);
        }

        let row_end = last_timestamp_in_row(mw, row)?;
        if can_time_delta_fit(row_end as i64 - last.base_time() as i64) {
            last.merge(seq)?;
            return Ok(RowDisposition::Merged);
        }

        rows.push(seq);
        Ok(RowDisposition::Appended)
    }

    fn check_same_series(&self, expected: &[u8], actual: &[u8]) -> Result<(), ScanError> {
        let mw = self.metric_width;
        let tags_offset = mw + TIMESTAMP_BYTES;
        let reason = if expected.len() != actual.len() {
            "row key length mismatch"
        } else if expected.get(..mw) != actual.get(..mw) {
            "metric ID mismatch"
        } else if expected.get(tags_offset..) != actual.get(tags_offset..) {
            "tags mismatch"
        } else {
            return Ok(());
        };
        Err(ScanError::SeriesKeyMismatch {
            reason,
            expected: hex(expected),
            actual: hex(actual),
        })
    }
}
