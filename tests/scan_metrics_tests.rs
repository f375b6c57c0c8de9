#![cfg(feature = "prometheus")]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use spanscan::telemetry::scan_metrics::{self, InProcessPrometheus};
use spanscan::{IdWidths, MemStore, SampleValue, ScanConfig, ScanQuery, SpanScanner, TagPair};

fn install_prometheus_once() -> &'static InProcessPrometheus {
    static PROM: OnceLock<InProcessPrometheus> = OnceLock::new();
    PROM.get_or_init(|| {
        InProcessPrometheus::install(Duration::from_millis(25))
            .expect("failed to install in-process prometheus recorder")
    })
}

fn parse_sample(rendered: &str, metric: &str) -> Option<f64> {
    for line in rendered.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        let val = parts.next()?;
        // Support exact match and label form: `name{...} value`.
        if key == metric
            || key.starts_with(metric) && key.as_bytes().get(metric.len()).copied() == Some(b'{')
        {
            if let Ok(v) = val.parse::<f64>() {
                return Some(v);
            }
        }
    }
    None
}

fn parse_counter(rendered: &str, base_name: &str) -> f64 {
    parse_sample(rendered, &format!("{}_total", base_name))
        .or_else(|| parse_sample(rendered, base_name))
        .unwrap_or(0.0)
}

fn extract_spanscan_lines(rendered: &str) -> String {
    rendered
        .lines()
        .filter(|l| l.contains("spanscan_"))
        .take(200)
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn scans_emit_latency_rows_and_filter_metrics() {
    let prom = install_prometheus_once();

    let before = prom.render();
    let before_rows = parse_counter(&before, scan_metrics::SCANNED_ROWS);
    let before_decisions = parse_counter(&before, scan_metrics::DOWNSAMPLE_DECISIONS);
    let before_latency_count =
        parse_sample(&before, &format!("{}_count", scan_metrics::SCAN_LATENCY_SECONDS))
            .unwrap_or(0.0);

    let widths = IdWidths::new(1, 1, 1);
    let store = Arc::new(MemStore::new("tsdb"));
    let tags = [TagPair::new(vec![1], vec![1])];
    for ts in [0u64, 1, 2, 3, 3600, 7200 + 100] {
        store
            .put_sample(&widths, b"t", &[1], &tags, ts, SampleValue::Float(ts as f64))
            .expect("put");
    }
    let config = ScanConfig {
        id_widths: Arc::new(widths),
        ..ScanConfig::default()
    };
    let scanner = SpanScanner::new(store, config);
    let rows = 3.0;
    scanner
        .find_spans(&ScanQuery::new(vec![1], 0).with_downsample(2))
        .expect("scan")
        .expect("spans");

    // Give the exporter time to run upkeep at least once.
    std::thread::sleep(Duration::from_millis(60));

    let after = prom.render();
    let after_rows = parse_counter(&after, scan_metrics::SCANNED_ROWS);
    let after_decisions = parse_counter(&after, scan_metrics::DOWNSAMPLE_DECISIONS);
    let after_latency_count =
        parse_sample(&after, &format!("{}_count", scan_metrics::SCAN_LATENCY_SECONDS))
            .unwrap_or(0.0);

    assert!(
        after_rows >= before_rows + rows,
        "expected scanned rows to increase by at least {}, before={}, after={}\n\nRendered spanscan_* metrics:\n{}",
        rows,
        before_rows,
        after_rows,
        extract_spanscan_lines(&after)
    );
    assert!(
        after_decisions > before_decisions,
        "expected downsample decisions to increase, before={}, after={}",
        before_decisions,
        after_decisions
    );
    assert!(
        after_latency_count >= before_latency_count + 1.0,
        "expected scan latency histogram count to increase, before={}, after={}",
        before_latency_count,
        after_latency_count
    );
}
