#![doc = include_str!("../README.md")]
// Declare modules
pub mod assembler;
pub mod codec;
pub mod comparator;
pub mod config;
pub mod downsample;
pub mod error;
pub mod key_pattern;
pub mod rowseq;
pub mod scan;
pub mod store;
pub mod telemetry;
pub mod types;

/// Configuration options for span scans.
pub use crate::config::{load_scan_config, ScanConfig};
/// Push-down filter keeping one sample per interval.
pub use crate::downsample::{DownsampleFilter, FilterDecision};
/// Error type for scan operations.
pub use crate::error::ScanError;
/// Row key regexp built from tag and group-by constraints.
pub use crate::key_pattern::KeyPattern;
/// Assembled series data.
pub use crate::rowseq::{RowSeq, Span};
/// Main entry point for finding spans.
pub use crate::scan::{ScanQuery, SpanScanner, Spans};
/// Store collaborators and their in-memory implementations.
pub use crate::store::{MemStore, RowCompactor, RowScanner, ScanSpec, SortingCompactor, StoreClient};
/// Structured event hook and latency sink for observability.
pub use crate::telemetry::{LatencySink, ScanEvent, ScanEventListener};
/// Identifier widths, cells and samples.
pub use crate::types::{Cell, DataPoint, IdWidthSource, IdWidths, SampleValue, TagPair, Timestamp};
