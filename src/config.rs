//! Scan configuration and its layered loading (defaults, TOML file, `SPANSCAN_*` env).

use crate::error::ScanError;
use crate::store::{RowCompactor, SortingCompactor};
use crate::telemetry::{metrics_latency_sink, noop_event_listener, LatencySink, ScanEventListener};
use crate::types::{IdWidthSource, IdWidths};
use ::config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Prefix of the environment variables read by [`load_scan_config`].
pub const ENV_PREFIX: &str = "SPANSCAN";

/// Configuration of a [`SpanScanner`](crate::scan::SpanScanner).
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Table holding the series data.
    pub table: String,
    /// Column family holding the samples.
    pub family: Vec<u8>,
    /// Rows the store returns per batch.
    pub max_rows_per_batch: usize,
    /// Widths of the ids embedded in row keys.
    pub id_widths: Arc<dyn IdWidthSource>,
    /// Combines the cells of a row before assembly.
    pub compactor: Arc<dyn RowCompactor>,
    /// Receives the store latency of every scan.
    pub latency_sink: Arc<dyn LatencySink>,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn ScanEventListener>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            table: "tsdb".to_string(),
            family: b"t".to_vec(),
            max_rows_per_batch: 128,
            id_widths: Arc::new(IdWidths::default()),
            compactor: Arc::new(SortingCompactor),
            latency_sink: metrics_latency_sink(),
            event_listener: noop_event_listener(),
        }
    }
}

impl ScanConfig {
    /// Rejects zero id widths, an empty table or family and a zero batch size.
    pub fn validate(&self) -> Result<(), ScanError> {
        let w = self.id_widths.widths();
        if w.metric == 0 || w.tag_name == 0 || w.tag_value == 0 {
            return Err(ScanError::Config(format!(
                "id widths must be > 0, got metric={} tag_name={} tag_value={}",
                w.metric, w.tag_name, w.tag_value
            )));
        }
        if self.table.is_empty() {
            return Err(ScanError::Config("table must not be empty".to_string()));
        }
        if self.family.is_empty() {
            return Err(ScanError::Config("family must not be empty".to_string()));
        }
        if self.max_rows_per_batch == 0 {
            return Err(ScanError::Config(
                "max_rows_per_batch must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Id width section of the config file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct IdWidthsFileConfig {
    pub metric: Option<usize>,
    pub tag_name: Option<usize>,
    pub tag_value: Option<usize>,
}

/// Scan config as read from file + env. Every field optional for layering.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ScanFileConfig {
    pub table: Option<String>,
    pub family: Option<String>,
    pub max_rows_per_batch: Option<usize>,
    pub id_widths: Option<IdWidthsFileConfig>,
}

/// Reads the optional TOML file at `path`, then `SPANSCAN_*` env vars
/// (`SPANSCAN_TABLE`, `SPANSCAN_ID_WIDTHS__METRIC`, ...), into a partial config.
pub fn read_file_config(path: Option<&Path>) -> Result<ScanFileConfig, ScanError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(ScanError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| ScanError::Config(e.to_string()))?;
    merged
        .try_deserialize()
        .map_err(|e| ScanError::Config(e.to_string()))
}

/// Merges a partial config onto `base`. Only overwrites fields that are `Some`.
pub fn merge_into_scan_config(base: &mut ScanConfig, partial: &ScanFileConfig) {
    if let Some(t) = &partial.table {
        base.table = t.clone();
    }
    if let Some(f) = &partial.family {
        base.family = f.as_bytes().to_vec();
    }
    if let Some(n) = partial.max_rows_per_batch {
        base.max_rows_per_batch = n;
    }
    if let Some(w) = &partial.id_widths {
        let current = base.id_widths.widths();
        base.id_widths = Arc::new(IdWidths::new(
            w.metric.unwrap_or(current.metric),
            w.tag_name.unwrap_or(current.tag_name),
            w.tag_value.unwrap_or(current.tag_value),
        ));
    }
}

/// Loads defaults, then the optional file, then the environment, and validates the result.
pub fn load_scan_config(path: Option<&Path>) -> Result<ScanConfig, ScanError> {
    let partial = read_file_config(path)?;
    let mut config = ScanConfig::default();
    merge_into_scan_config(&mut config, &partial);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let c = ScanConfig::default();
        c.validate().unwrap();
        assert_eq!(c.table, "tsdb");
        assert_eq!(c.family, b"t");
        assert_eq!(c.max_rows_per_batch, 128);
        assert_eq!(c.id_widths.widths(), IdWidths::new(3, 3, 3));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            "table = \"metrics\"\nmax_rows_per_batch = 16\n\n[id_widths]\nmetric = 4\n"
        )
        .unwrap();
        let c = load_scan_config(Some(f.path())).unwrap();
        assert_eq!(c.table, "metrics");
        assert_eq!(c.family, b"t");
        assert_eq!(c.max_rows_per_batch, 16);
        assert_eq!(c.id_widths.widths(), IdWidths::new(4, 3, 3));
    }

    #[test]
    fn zero_width_is_rejected() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(f, "[id_widths]\ntag_value = 0\n").unwrap();
        assert!(matches!(
            load_scan_config(Some(f.path())),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = load_scan_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(r, Err(ScanError::Config(_))));
    }

    #[test]
    fn zero_batch_is_rejected() {
        let c = ScanConfig {
            max_rows_per_batch: 0,
            ..ScanConfig::default()
        };
        assert!(c.validate().is_err());
    }
}
