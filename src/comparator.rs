//! Ordering of row keys that ignores the embedded base timestamp, so every time bucket of
//! one series collates together.

use crate::codec::mask_timestamp;
use crate::error::hex;
use crate::types::{IdWidths, TIMESTAMP_BYTES};
use std::cmp::Ordering;
use std::fmt;

/// Compares two row keys by metric id, then by tag bytes, then by length.
///
/// Bytes compare unsigned. The `TIMESTAMP_BYTES` following the metric id are skipped.
pub fn compare_series_keys(metric_width: usize, a: &[u8], b: &[u8]) -> Ordering {
    fn split(metric_width: usize, key: &[u8]) -> (&[u8], &[u8]) {
        let metric = &key[..metric_width.min(key.len())];
        let tags = key.get(metric_width + TIMESTAMP_BYTES..).unwrap_or(&[]);
        (metric, tags)
    }
    let (a_metric, a_tags) = split(metric_width, a);
    let (b_metric, b_tags) = split(metric_width, b);
    a_metric
        .cmp(b_metric)
        .then_with(|| a_tags.cmp(b_tags))
        .then_with(|| a.len().cmp(&b.len()))
}

/// Key of a span: a row key with its timestamp masked out.
///
/// Ordered with [`compare_series_keys`]; two row keys of the same series but different
/// buckets map to equal `SeriesKey`s.
#[derive(Clone)]
pub struct SeriesKey {
    key: Vec<u8>,
    metric_width: usize,
}

impl SeriesKey {
    pub fn from_row_key(metric_width: usize, row_key: &[u8]) -> Self {
        Self {
            key: mask_timestamp(metric_width, row_key),
            metric_width,
        }
    }

    /// The masked key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn metric(&self) -> &[u8] {
        &self.key[..self.metric_width.min(self.key.len())]
    }

    /// Concatenated tag pairs.
    pub fn tag_bytes(&self) -> &[u8] {
        self.key
            .get(self.metric_width + TIMESTAMP_BYTES..)
            .unwrap_or(&[])
    }

    /// Tag pairs split as `(name_id, value_id)`.
    pub fn tag_pairs<'a>(&'a self, widths: &IdWidths) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        let name_width = widths.tag_name;
        self.tag_bytes()
            .chunks_exact(widths.tag_pair())
            .map(move |pair| pair.split_at(name_width))
    }
}

impl PartialEq for SeriesKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SeriesKey {}

impl PartialOrd for SeriesKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeriesKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_series_keys(self.metric_width, &self.key, &other.key)
    }
}

impl fmt::Debug for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesKey({})", hex(&self.key))
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.key))
    }
}
