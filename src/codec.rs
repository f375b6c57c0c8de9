//! Row key and column qualifier encoding.
//!
//! Row key layout: `metric_id ‖ base_timestamp (u32 BE) ‖ (tag_name_id ‖ tag_value_id)*`,
//! tag pairs sorted by name id. Qualifier layout: 2 bytes BE, the high 12 bits hold the
//! delta to the base timestamp and the low [`FLAG_BITS`] hold the value flags.

use crate::error::{hex, ScanError};
use crate::types::{
    Cell, IdWidths, SampleValue, TagPair, Timestamp, FLAGS_MASK, FLAG_BITS, FLAG_FLOAT,
    LENGTH_MASK, MAX_TIME_DELTA, QUALIFIER_BYTES, TIMESTAMP_BYTES,
};

/// Builds the full row key for a series bucket. Tags are sorted by name id.
pub fn row_key(
    widths: &IdWidths,
    metric: &[u8],
    base_time: Timestamp,
    tags: &[TagPair],
) -> Result<Vec<u8>, ScanError> {
    check_metric_width(metric, widths.metric)?;
    let mut sorted: Vec<&TagPair> = tags.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    for pair in sorted.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(ScanError::InvalidQuery(format!(
                "duplicate tag name id {}",
                hex(&pair[0].name)
            )));
        }
    }

    let mut key = Vec::with_capacity(widths.tags_offset() + tags.len() * widths.tag_pair());
    key.extend_from_slice(metric);
    key.extend_from_slice(&(base_time as u32).to_be_bytes());
    for tag in sorted {
        if tag.name.len() != widths.tag_name || tag.value.len() != widths.tag_value {
            return Err(ScanError::InvalidQuery(format!(
                "tag {}={} does not match id widths {}/{}",
                hex(&tag.name),
                hex(&tag.value),
                widths.tag_name,
                widths.tag_value
            )));
        }
        key.extend_from_slice(&tag.name);
        key.extend_from_slice(&tag.value);
    }
    Ok(key)
}

/// Computes the `[start, stop)` keys of a scan over one metric.
///
/// Both timestamps are truncated to 32 bits. An unset `to_time` scans to the end of the
/// metric (`0xFFFFFFFF`).
pub fn encode_range_bounds(
    metric: &[u8],
    metric_width: usize,
    from_time: Timestamp,
    to_time: Option<Timestamp>,
) -> Result<(Vec<u8>, Vec<u8>), ScanError> {
    check_metric_width(metric, metric_width)?;
    let mut start = Vec::with_capacity(metric_width + TIMESTAMP_BYTES);
    start.extend_from_slice(metric);
    start.extend_from_slice(&(from_time as u32).to_be_bytes());

    let stop_ts = match to_time {
        Some(t) => t as u32,
        None => u32::MAX,
    };
    let mut stop = Vec::with_capacity(metric_width + TIMESTAMP_BYTES);
    stop.extend_from_slice(metric);
    stop.extend_from_slice(&stop_ts.to_be_bytes());
    Ok((start, stop))
}

/// Reads the base timestamp embedded in a row key.
pub fn base_time(metric_width: usize, key: &[u8]) -> Result<Timestamp, ScanError> {
    let bytes = key
        .get(metric_width..metric_width + TIMESTAMP_BYTES)
        .ok_or_else(|| {
            ScanError::MalformedRow(format!(
                "row key {} too short for metric_width={}",
                hex(key),
                metric_width
            ))
        })?;
    let mut buf = [0u8; TIMESTAMP_BYTES];
    buf.copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf) as Timestamp)
}

/// Returns a copy of `key` with its timestamp bytes zeroed.
pub fn mask_timestamp(metric_width: usize, key: &[u8]) -> Vec<u8> {
    let mut masked = key.to_vec();
    let end = (metric_width + TIMESTAMP_BYTES).min(masked.len());
    if metric_width < end {
        masked[metric_width..end].fill(0);
    }
    masked
}

/// Timestamp of the last sample in a compacted row.
pub fn last_timestamp_in_row(metric_width: usize, row: &Cell) -> Result<Timestamp, ScanError> {
    let base = base_time(metric_width, &row.key)?;
    let qual = &row.qualifier;
    if qual.len() < QUALIFIER_BYTES {
        return Err(ScanError::MalformedRow(format!(
            "row {} has no cells",
            hex(&row.key)
        )));
    }
    let last = read_qualifier(qual, qual.len() / QUALIFIER_BYTES - 1);
    Ok(base + qualifier_delta(last) as Timestamp)
}

/// Whether a span of `delta` seconds from a base timestamp still fits in a qualifier.
#[inline]
pub fn can_time_delta_fit(delta: i64) -> bool {
    delta >= 0 && (delta as u64) <= MAX_TIME_DELTA
}

/// Encodes a qualifier. `delta` must be at most [`MAX_TIME_DELTA`].
#[inline]
pub fn encode_qualifier(delta: u16, flags: u16) -> [u8; QUALIFIER_BYTES] {
    debug_assert!(delta as u64 <= MAX_TIME_DELTA);
    ((delta << FLAG_BITS) | (flags & FLAGS_MASK)).to_be_bytes()
}

/// Reads the `index`-th qualifier of a (possibly compacted) qualifier buffer.
#[inline]
pub fn read_qualifier(qualifiers: &[u8], index: usize) -> u16 {
    let off = index * QUALIFIER_BYTES;
    u16::from_be_bytes([qualifiers[off], qualifiers[off + 1]])
}

#[inline]
pub fn qualifier_delta(qualifier: u16) -> u16 {
    qualifier >> FLAG_BITS
}

#[inline]
pub fn qualifier_flags(qualifier: u16) -> u16 {
    qualifier & FLAGS_MASK
}

/// Number of value bytes a qualifier's flags announce.
#[inline]
pub fn value_len(flags: u16) -> usize {
    ((flags & LENGTH_MASK) + 1) as usize
}

/// Splits a qualifier buffer into its 2-byte qualifiers.
pub fn qualifiers(buf: &[u8]) -> Result<Vec<u16>, ScanError> {
    if buf.len() % QUALIFIER_BYTES != 0 {
        return Err(ScanError::MalformedRow(format!(
            "qualifier buffer of odd length {}",
            buf.len()
        )));
    }
    Ok((0..buf.len() / QUALIFIER_BYTES)
        .map(|i| read_qualifier(buf, i))
        .collect())
}

/// Decodes a value according to its qualifier flags.
pub fn decode_value(flags: u16, bytes: &[u8]) -> Result<SampleValue, ScanError> {
    if bytes.len() != value_len(flags) {
        return Err(ScanError::MalformedRow(format!(
            "value of {} bytes for flags {:#x}",
            bytes.len(),
            flags
        )));
    }
    if flags & FLAG_FLOAT != 0 {
        return match bytes.len() {
            4 => Ok(SampleValue::Float(
                f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            )),
            8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                Ok(SampleValue::Float(f64::from_be_bytes(buf)))
            }
            n => Err(ScanError::MalformedRow(format!(
                "floating point value of {} bytes",
                n
            ))),
        };
    }
    match bytes.len() {
        1 => Ok(SampleValue::Int(bytes[0] as i8 as i64)),
        2 => Ok(SampleValue::Int(i16::from_be_bytes([bytes[0], bytes[1]]) as i64)),
        4 => Ok(SampleValue::Int(
            i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        )),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            Ok(SampleValue::Int(i64::from_be_bytes(buf)))
        }
        n => Err(ScanError::MalformedRow(format!("integer value of {} bytes", n))),
    }
}

/// Encodes one sample as a `(qualifier, value)` pair. Integers use the narrowest width.
pub fn encode_sample(delta: u16, value: SampleValue) -> ([u8; QUALIFIER_BYTES], Vec<u8>) {
    match value {
        SampleValue::Float(f) => (
            encode_qualifier(delta, FLAG_FLOAT | 0x7),
            f.to_be_bytes().to_vec(),
        ),
        SampleValue::Int(v) => {
            let bytes = if let Ok(b) = i8::try_from(v) {
                b.to_be_bytes().to_vec()
            } else if let Ok(s) = i16::try_from(v) {
                s.to_be_bytes().to_vec()
            } else if let Ok(i) = i32::try_from(v) {
                i.to_be_bytes().to_vec()
            } else {
                v.to_be_bytes().to_vec()
            };
            let flags = (bytes.len() - 1) as u16;
            (encode_qualifier(delta, flags), bytes)
        }
    }
}

fn check_metric_width(metric: &[u8], metric_width: usize) -> Result<(), ScanError> {
    if metric.len() != metric_width {
        return Err(ScanError::InvalidQuery(format!(
            "metric id {} is {} bytes, expected {}",
            hex(metric),
            metric.len(),
            metric_width
        )));
    }
    Ok(())
}
